//! Stored key/value records
//!
//! An entry's key and value live back to back in one allocator slot:
//! `[key bytes][value bytes]`. The slot is frozen once written, so entries are
//! immutable and cheap to clone; readers hold their own reference after the
//! index lock is released.

use crate::CacheError;
use crate::storage::buckets::BucketAllocator;
use bytes::Bytes;

/// One cached key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    key_len: usize,
    /// Key followed by value, trimmed to their combined length
    data: Bytes,
}

impl Entry {
    /// Copy `key` and `value` into a slot from `allocator`
    pub fn store(allocator: &BucketAllocator, key: &[u8], value: &[u8]) -> Result<Self, CacheError> {
        let len = key.len() + value.len();
        let mut buf = allocator.allocate(len)?.into_inner();

        buf[..key.len()].copy_from_slice(key);
        buf[key.len()..len].copy_from_slice(value);
        buf.truncate(len);

        Ok(Self {
            key_len: key.len(),
            data: buf.freeze(),
        })
    }

    /// Key bytes
    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.data[..self.key_len]
    }

    /// Value bytes
    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.data[self.key_len..]
    }

    /// True if this entry is stored under `key`
    #[inline]
    pub fn matches(&self, key: &[u8]) -> bool {
        self.key_len == key.len() && self.key() == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn allocator() -> BucketAllocator {
        let config = CacheConfig {
            page_size: 4096,
            min_item_size: 64,
            growth_factor: 2.0,
            max_classes: 4,
            ..CacheConfig::default()
        };
        BucketAllocator::with_budget(&config, 16 * 4096).unwrap()
    }

    #[test]
    fn test_store_layout() {
        let allocator = allocator();
        let entry = Entry::store(&allocator, b"foo", b"hello").unwrap();
        assert_eq!(entry.key(), b"foo");
        assert_eq!(entry.value(), b"hello");
        assert_eq!(entry.key().len() + entry.value().len(), 8);
    }

    #[test]
    fn test_empty_value() {
        let allocator = allocator();
        let entry = Entry::store(&allocator, b"k", b"").unwrap();
        assert_eq!(entry.value(), b"");
        assert!(entry.value().is_empty());
    }

    #[test]
    fn test_matches_compares_length_then_bytes() {
        let allocator = allocator();
        let entry = Entry::store(&allocator, b"foo", b"bar").unwrap();
        assert!(entry.matches(b"foo"));
        assert!(!entry.matches(b"fo"));
        assert!(!entry.matches(b"foobar"));
        // "foob" + "ar" shares the same data bytes but not the key
        assert!(!entry.matches(b"foob"));
    }

    #[test]
    fn test_too_large_propagates() {
        let allocator = allocator();
        let value = vec![0u8; 600];
        assert!(matches!(
            Entry::store(&allocator, b"key", &value),
            Err(CacheError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_entries_from_one_page_are_independent() {
        let allocator = allocator();
        let a = Entry::store(&allocator, b"a", b"first").unwrap();
        let b = Entry::store(&allocator, b"b", b"second").unwrap();
        drop(a);
        assert_eq!(b.value(), b"second");
    }
}
