//! Sharded hash index
//!
//! Keys map to one of `2^bits` shards through a fixed-seed `ahash`. Each shard
//! is a short chain of entries behind its own reader/writer lock, so lookups
//! share a shard, writers exclude everyone on that shard only, and distinct
//! shards never contend.

use crate::storage::entry::Entry;
use ahash::RandomState;
use parking_lot::{RwLock, RwLockWriteGuard};

// Fixed seeds keep shard assignment stable across runs of one build
const SEEDS: [u64; 4] = [
    0xdead_beef_feed_cafe,
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
];

type Chain = Vec<Entry>;

/// Fixed-cardinality sharded map from key bytes to [`Entry`]
pub struct ShardedIndex {
    hasher: RandomState,
    shards: Box<[RwLock<Chain>]>,
    mask: u64,
}

impl ShardedIndex {
    /// Create an index with `2^bits` empty shards
    pub fn new(bits: u32) -> Self {
        assert!((1..=28).contains(&bits), "shard bits must be within 1..=28");

        let count = 1_usize << bits;
        let shards = (0..count)
            .map(|_| RwLock::new(Chain::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            hasher: RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]),
            shards,
            mask: (count as u64) - 1,
        }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Bytes taken by the empty shard table of a `2^bits` index
    ///
    /// Paid up front and not counted against the allocator budget.
    pub fn table_bytes(bits: u32) -> usize {
        (1_usize << bits) * std::mem::size_of::<RwLock<Chain>>()
    }

    /// Shard that holds `key`
    #[inline]
    pub fn shard_for(&self, key: &[u8]) -> usize {
        (self.hasher.hash_one(key) & self.mask) as usize
    }

    /// Look up `key` under the shard's shared lock
    pub fn find(&self, key: &[u8]) -> Option<Entry> {
        let chain = self.shards[self.shard_for(key)].read();
        chain.iter().find(|entry| entry.matches(key)).cloned()
    }

    /// Append `entry` to its shard without checking for an existing key
    ///
    /// Callers that may store a key twice use [`ShardedIndex::replace`].
    pub fn insert(&self, entry: Entry) {
        let mut chain = self.lock_exclusive(entry.key());
        chain.push(entry);
    }

    /// Swap in `entry` for its key in one exclusive critical section
    ///
    /// Returns the entry it superseded, if any. Readers of the shard see
    /// either the old entry or the new one, never a gap.
    pub fn replace(&self, entry: Entry) -> Option<Entry> {
        let mut chain = self.lock_exclusive(entry.key());
        let old = remove(&mut chain, entry.key());
        chain.push(entry);
        old
    }

    /// Number of entries, counted shard by shard
    ///
    /// Not a consistent snapshot while writers are active.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Drop every entry
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut chain = shard.write();
            chain.clear();
            chain.shrink_to_fit();
        }
    }

    /// Hold the exclusive lock of `key`'s shard
    pub(crate) fn lock_exclusive(&self, key: &[u8]) -> RwLockWriteGuard<'_, Chain> {
        self.shards[self.shard_for(key)].write()
    }
}

/// Unlink the entry for `key` from an exclusively locked chain
fn remove(chain: &mut RwLockWriteGuard<'_, Chain>, key: &[u8]) -> Option<Entry> {
    let pos = chain.iter().position(|entry| entry.matches(key))?;
    Some(chain.swap_remove(pos))
}
