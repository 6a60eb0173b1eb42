//! ## qmempool-core::alloc::heap
//! **Per-element heap allocator**
//!
//! One `std::alloc` call per element, with an optional ceiling on live
//! elements to model an exhausted backing store.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use super::backing::{check_layout, AllocFlags, BackingAllocator, BackingError};
use super::stats::{AllocStats, AllocStatsSnapshot};

/// Backing allocator serving each element straight from the global heap.
#[derive(Debug)]
pub struct HeapAllocator {
    layout: Layout,
    limit: Option<usize>,
    live: AtomicUsize,
    stats: AllocStats,
}

impl HeapAllocator {
    /// Creates an unbounded allocator for elements of `layout`.
    pub fn new(layout: Layout) -> Result<Self, BackingError> {
        Ok(Self {
            layout: check_layout(layout)?,
            limit: None,
            live: AtomicUsize::new(0),
            stats: AllocStats::new(),
        })
    }

    /// Creates an allocator for elements of `size` bytes aligned to `align`.
    pub fn with_size(size: usize, align: usize) -> Result<Self, BackingError> {
        Self::new(Layout::from_size_align(size, align)?)
    }

    /// Creates an allocator sized for values of type `T`.
    pub fn for_type<T>() -> Result<Self, BackingError> {
        Self::new(Layout::new::<T>())
    }

    /// Caps the number of simultaneously live elements.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Elements currently handed out.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> AllocStatsSnapshot {
        self.stats.snapshot()
    }

    fn reserve(&self) -> bool {
        match self.limit {
            None => {
                self.live.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(limit) => self
                .live
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
                    (live < limit).then_some(live + 1)
                })
                .is_ok(),
        }
    }
}

impl BackingAllocator for HeapAllocator {
    fn layout(&self) -> Layout {
        self.layout
    }

    fn alloc(&self, flags: AllocFlags) -> Option<NonNull<u8>> {
        if !self.reserve() {
            self.stats.increment_failures();
            trace!(limit = ?self.limit, "heap allocator limit reached");
            return None;
        }

        // SAFETY: the layout has a non-zero size, checked at construction.
        let raw = unsafe {
            if flags.contains(AllocFlags::ZERO) {
                alloc::alloc_zeroed(self.layout)
            } else {
                alloc::alloc(self.layout)
            }
        };

        match NonNull::new(raw) {
            Some(ptr) => {
                self.stats.increment_allocations();
                Some(ptr)
            }
            None => {
                self.live.fetch_sub(1, Ordering::Relaxed);
                self.stats.increment_failures();
                None
            }
        }
    }

    unsafe fn free(&self, elem: NonNull<u8>) {
        alloc::dealloc(elem.as_ptr(), self.layout);
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.stats.increment_deallocations();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocator_alloc_free() {
        let heap = HeapAllocator::for_type::<[u64; 4]>().unwrap();
        let elem = heap.alloc(AllocFlags::NONE).unwrap();
        assert_eq!(elem.as_ptr() as usize % heap.layout().align(), 0);
        assert_eq!(heap.live(), 1);

        unsafe { heap.free(elem) };
        assert_eq!(heap.live(), 0);
        assert_eq!(heap.stats().allocations, 1);
        assert_eq!(heap.stats().deallocations, 1);
    }

    #[test]
    fn test_heap_allocator_zero_flag() {
        let heap = HeapAllocator::with_size(256, 8).unwrap();
        let elem = heap.alloc(AllocFlags::ZERO).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(elem.as_ptr(), 256) };
        assert!(bytes.iter().all(|b| *b == 0));
        unsafe { heap.free(elem) };
    }

    #[test]
    fn test_heap_allocator_limit() {
        let heap = HeapAllocator::with_size(64, 8).unwrap().with_limit(2);
        let a = heap.alloc(AllocFlags::NONE).unwrap();
        let b = heap.alloc(AllocFlags::NONE).unwrap();
        assert!(heap.alloc(AllocFlags::NONE).is_none());
        assert_eq!(heap.stats().failures, 1);

        unsafe { heap.free(a) };
        let c = heap.alloc(AllocFlags::NONE).unwrap();
        unsafe {
            heap.free(b);
            heap.free(c);
        }
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_heap_allocator_zero_size() {
        assert!(matches!(
            HeapAllocator::with_size(0, 8),
            Err(BackingError::ZeroSized)
        ));
    }
}
