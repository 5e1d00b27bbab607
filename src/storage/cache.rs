//! Cache service: the sharded index backed by the bucket allocator

use crate::CacheError;
use crate::config::CacheConfig;
use crate::storage::buckets::BucketAllocator;
use crate::storage::entry::Entry;
use crate::storage::index::ShardedIndex;
use tracing::info;

/// Shared cache state, one per process
///
/// Workers hold it through an `Arc`; every method takes `&self`.
pub struct Cache {
    allocator: BucketAllocator,
    index: ShardedIndex,
}

impl Cache {
    /// Build the allocator and index from configuration
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let allocator = BucketAllocator::new(config)?;
        let index = ShardedIndex::new(config.shard_bits);
        info!(
            shards = index.shard_count(),
            table_bytes = ShardedIndex::table_bytes(config.shard_bits),
            "Sharded index initialised"
        );
        Ok(Self::from_parts(allocator, index))
    }

    pub fn from_parts(allocator: BucketAllocator, index: ShardedIndex) -> Self {
        Self { allocator, index }
    }

    /// Current entry for `key`
    pub fn find(&self, key: &[u8]) -> Result<Entry, CacheError> {
        self.index.find(key).ok_or(CacheError::KeyNotFound)
    }

    /// Store `value` under `key`, superseding any previous entry
    ///
    /// The slot is allocated and filled before the shard lock is taken.
    pub fn replace(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        let entry = Entry::store(&self.allocator, key, value)?;
        self.index.replace(entry);
        Ok(())
    }

    pub fn allocator(&self) -> &BucketAllocator {
        &self.allocator
    }

    pub fn index(&self) -> &ShardedIndex {
        &self.index
    }

    /// Drop all entries and release page memory
    pub fn shutdown(&self) {
        self.index.clear();
        self.allocator.shutdown();
    }
}
