//! Slab-style bucket allocator
//!
//! Item storage is carved out of large fixed-size pages. Sizes are split into
//! a fixed set of disjoint classes ("buckets") growing geometrically from a
//! minimum size; every allocation is served from the smallest class that can
//! hold it, by advancing a cursor through that class's current page. A
//! class whose page is full takes another page from a shared free pool, which
//! is refilled in batches from the memory budget.
//!
//! Slots are never reclaimed: once the budget is spent, allocation fails with
//! [`CacheError::OutOfMemory`] until [`BucketAllocator::shutdown`].
//!
//! A page is one `BytesMut` allocation. Slots are split off its front, so
//! every slot is a disjoint view into the page and issuing one costs no heap
//! allocation.

use crate::CacheError;
use crate::config::CacheConfig;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Maximum number of pages reserved from the budget per free-pool refill
pub const POOL_REFILL_PAGES: usize = 32;

/// Compute the item size of every class
///
/// Starts at `min_size` and multiplies by `growth_factor`, truncating to whole
/// bytes at each step.
pub fn size_classes(min_size: usize, growth_factor: f64, count: usize) -> Vec<usize> {
    let mut size = min_size;
    (0..count)
        .map(|_| {
            let class = size;
            size = (size as f64 * growth_factor) as usize;
            class
        })
        .collect()
}

/// A fixed-size region handed out by the allocator
///
/// Exactly as long as its class's item size. Dereferences to the slot bytes.
#[derive(Debug)]
pub struct Slot {
    buf: BytesMut,
    class_id: usize,
}

impl Slot {
    /// Index of the class this slot came from
    pub fn class_id(&self) -> usize {
        self.class_id
    }

    /// Take the underlying buffer
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

impl Deref for Slot {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for Slot {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Snapshot of one size class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassStats {
    /// Slot size in bytes
    pub item_size: usize,
    /// Slots that fit in one page
    pub items_per_page: usize,
    /// Pages attached to this class
    pub pages: usize,
    /// Slots issued from the current page
    pub items_in_page: usize,
}

/// One size class
struct Bucket {
    item_size: usize,
    items_per_page: usize,
    pages: usize,
    items_in_page: usize,
    /// Unissued remainder of the current page
    current: BytesMut,
}

impl Bucket {
    fn new(item_size: usize, page_size: usize) -> Self {
        Self {
            item_size,
            items_per_page: page_size / item_size,
            pages: 0,
            items_in_page: 0,
            current: BytesMut::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.items_in_page == self.items_per_page
    }

    fn attach(&mut self, page: BytesMut) {
        // Whatever is left of the old page is smaller than one slot
        self.current = page;
        self.pages += 1;
        self.items_in_page = 0;
    }

    fn issue(&mut self) -> BytesMut {
        debug_assert!(!self.is_full());
        self.items_in_page += 1;
        self.current.split_to(self.item_size)
    }

    fn stats(&self) -> ClassStats {
        ClassStats {
            item_size: self.item_size,
            items_per_page: self.items_per_page,
            pages: self.pages,
            items_in_page: self.items_in_page,
        }
    }
}

/// Mutable allocator state, guarded by one allocator-wide lock
struct State {
    buckets: Vec<Bucket>,
    /// Reserved pages not yet attached to a class
    free_pages: Vec<BytesMut>,
    /// Bytes of page memory reserved from the budget
    reserved: usize,
    shut_down: bool,
}

/// Bucket allocator shared by all workers
pub struct BucketAllocator {
    class_sizes: Vec<usize>,
    page_size: usize,
    memory_limit: usize,
    state: Mutex<State>,
    // Mirrors of state counters for lock-free reads by metrics
    reserved_bytes: AtomicUsize,
    pages_assigned: AtomicUsize,
    exhausted: AtomicBool,
}

impl BucketAllocator {
    /// Build the class table and attach one page to every class
    ///
    /// Fails with [`CacheError::OutOfMemory`] when the budget cannot cover the
    /// first page of every class.
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::with_budget(config, config.memory_limit_bytes())
    }

    /// Same as [`BucketAllocator::new`] with the budget given in bytes
    pub fn with_budget(config: &CacheConfig, memory_limit: usize) -> Result<Self, CacheError> {
        let page_size = config.page_size;
        let mut class_sizes = size_classes(
            config.min_item_size,
            config.growth_factor,
            config.max_classes,
        );
        // A class must fit in a page at least once
        class_sizes.retain(|&size| size > 0 && size <= page_size);
        class_sizes.dedup();

        let buckets = class_sizes
            .iter()
            .map(|&size| Bucket::new(size, page_size))
            .collect();

        let allocator = Self {
            class_sizes,
            page_size,
            memory_limit,
            state: Mutex::new(State {
                buckets,
                free_pages: Vec::new(),
                reserved: 0,
                shut_down: false,
            }),
            reserved_bytes: AtomicUsize::new(0),
            pages_assigned: AtomicUsize::new(0),
            exhausted: AtomicBool::new(false),
        };

        {
            let mut state = allocator.state.lock();
            for class_id in 0..allocator.class_sizes.len() {
                allocator.attach_page(&mut state, class_id)?;
            }
        }

        info!(
            classes = allocator.class_sizes.len(),
            smallest = allocator.class_sizes.first().copied().unwrap_or(0),
            largest = allocator.max_item_size(),
            page_size,
            memory_limit,
            "Bucket allocator initialised"
        );

        Ok(allocator)
    }

    /// Index of the smallest class whose item size is at least `size`
    pub fn class_for(&self, size: usize) -> Option<usize> {
        let id = self.class_sizes.partition_point(|&class| class < size);
        (id < self.class_sizes.len()).then_some(id)
    }

    /// Item size of the largest class
    pub fn max_item_size(&self) -> usize {
        self.class_sizes.last().copied().unwrap_or(0)
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Memory budget in bytes
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Bytes of page memory reserved from the budget so far
    pub fn memory_reserved(&self) -> usize {
        self.reserved_bytes.load(Ordering::Relaxed)
    }

    /// Pages attached to classes so far
    pub fn pages_assigned(&self) -> usize {
        self.pages_assigned.load(Ordering::Relaxed)
    }

    /// Per-class snapshot, smallest class first
    pub fn classes(&self) -> Vec<ClassStats> {
        self.state.lock().buckets.iter().map(Bucket::stats).collect()
    }

    /// Hand out a slot of at least `size` bytes
    pub fn allocate(&self, size: usize) -> Result<Slot, CacheError> {
        let mut state = self.state.lock();

        let class_id = self.class_for(size).ok_or(CacheError::TooLarge {
            requested: size,
            max: self.max_item_size(),
        })?;

        if state.shut_down {
            return Err(CacheError::OutOfMemory);
        }

        if state.buckets[class_id].is_full() {
            self.attach_page(&mut state, class_id)?;
        }

        let buf = state.buckets[class_id].issue();
        Ok(Slot { buf, class_id })
    }

    /// Release all page memory and the free pool
    ///
    /// Slots already issued stay valid until dropped; no further slots are
    /// issued.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.free_pages = Vec::new();
        for bucket in &mut state.buckets {
            bucket.current = BytesMut::new();
            bucket.items_in_page = bucket.items_per_page;
        }
        info!(
            reserved = state.reserved,
            pages = self.pages_assigned(),
            "Bucket allocator shut down"
        );
    }

    fn attach_page(&self, state: &mut State, class_id: usize) -> Result<(), CacheError> {
        let page = match state.free_pages.pop() {
            Some(page) => page,
            None => {
                self.refill(state)?;
                state.free_pages.pop().ok_or(CacheError::OutOfMemory)?
            }
        };

        state.buckets[class_id].attach(page);
        self.pages_assigned.fetch_add(1, Ordering::Relaxed);
        debug!(
            class_id,
            item_size = self.class_sizes[class_id],
            pages = state.buckets[class_id].pages,
            "Attached page to class"
        );
        Ok(())
    }

    /// Reserve up to [`POOL_REFILL_PAGES`] pages from the remaining budget
    fn refill(&self, state: &mut State) -> Result<(), CacheError> {
        let remaining = self.memory_limit.saturating_sub(state.reserved) / self.page_size;
        let count = remaining.min(POOL_REFILL_PAGES);

        if count == 0 {
            if !self.exhausted.swap(true, Ordering::Relaxed) {
                warn!(
                    reserved = state.reserved,
                    limit = self.memory_limit,
                    "Memory budget exhausted, further stores will fail"
                );
            }
            return Err(CacheError::OutOfMemory);
        }

        state.free_pages.reserve(count);
        for _ in 0..count {
            state.free_pages.push(BytesMut::zeroed(self.page_size));
        }
        state.reserved += count * self.page_size;
        self.reserved_bytes.store(state.reserved, Ordering::Relaxed);

        debug!(
            pages = count,
            reserved = state.reserved,
            "Refilled free page pool"
        );
        Ok(())
    }
}
