//! Prelude module for common imports.
//!
//! # Usage
//!
//! ```ignore
//! use bucketcache::prelude::*;
//! ```

// Error types
pub use crate::error::{BucketCacheError, CacheError, ProtocolError, Result};

// Configuration
pub use crate::config::{CacheConfig, Config, ServerConfig};

// Storage
pub use crate::storage::{BucketAllocator, Cache, Entry, ShardedIndex};

// Protocol
pub use crate::protocol::{Envelope, Request, ResponseWriter};

// Engine
pub use crate::engine::{DropReason, Processed, RequestEngine};

// Metrics
pub use crate::metrics::Metrics;

// Server
pub use crate::server::{Server, Transport};

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
