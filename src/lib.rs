//! # bucketcache
//!
//! Memcached-compatible key/value cache served over UDP, built for low
//! per-request allocation cost.
//!
//! ## Features
//!
//! - Memcached GET and SET over the ASCII and binary protocols
//! - UDP frame header handling (single-datagram requests)
//! - Slab-style bucket allocator: geometric size classes carved from 1 MiB pages
//! - Sharded hash index with one reader/writer lock per shard
//! - Prometheus metrics
//!
//! ## Example
//!
//! ```ignore
//! use bucketcache::config::Config;
//! use bucketcache::storage::Cache;
//!
//! let config = Config::default();
//! let cache = Cache::new(&config.cache)?;
//! cache.replace(b"foo", b"bar")?;
//! assert_eq!(cache.find(b"foo")?.value(), b"bar");
//! ```
//!
//! ## Architecture
//!
//! ```text
//!              ┌────────────────────── bucketcache ──────────────────────┐
//!  UDP         │  worker 0..N                                            │
//! ───────────▶ │   RequestEngine ──▶ Cache ──┬─▶ ShardedIndex (2^n locks)│
//! datagrams    │   (frame, decode,           └─▶ BucketAllocator         │
//!              │    execute, encode)              (classes over pages)  │
//!              └─────────────────────────────────────────────────────────┘
//! ```

// Modules
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use error::{BucketCacheError, CacheError, ProtocolError, Result};
