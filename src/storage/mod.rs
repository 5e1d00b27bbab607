//! Storage layer: bucket allocator, entries, and the sharded index

mod buckets;
mod cache;
mod entry;
mod index;

pub use buckets::{BucketAllocator, ClassStats, POOL_REFILL_PAGES, Slot, size_classes};
pub use cache::Cache;
pub use entry::Entry;
pub use index::ShardedIndex;
