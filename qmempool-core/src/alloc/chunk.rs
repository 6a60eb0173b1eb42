//! ## qmempool-core::alloc::chunk
//! **Bounded chunked allocator behind a single lock**
//!
//! Reserves `capacity` element slots up front, split over chunks of
//! `chunk_size` slots, and serves them from one mutex-protected free list.
//! Every call takes the lock, which is the contention the pool's cache
//! tiers amortise.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use parking_lot::Mutex;
use tracing::debug;

use super::backing::{check_layout, AllocFlags, BackingAllocator, BackingError};
use super::stats::{AllocStats, AllocStatsSnapshot};

struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
}

pub struct ChunkAllocator {
    layout: Layout,
    stride: usize,
    chunk_size: usize,
    capacity: usize,
    chunks: Box<[Chunk]>,
    free_slots: Mutex<Vec<usize>>,
    stats: AllocStats,
}

// SAFETY: chunk memory is owned by the allocator, and slot hand-out is
// serialised by `free_slots`.
unsafe impl Send for ChunkAllocator {}
unsafe impl Sync for ChunkAllocator {}

impl ChunkAllocator {
    /// Reserves `capacity` slots of `layout`, `chunk_size` slots per chunk.
    pub fn new(layout: Layout, chunk_size: usize, capacity: usize) -> Result<Self, BackingError> {
        let layout = check_layout(layout)?;
        if chunk_size == 0 || capacity == 0 {
            return Err(BackingError::ZeroCapacity);
        }

        let stride = layout.pad_to_align().size();
        let num_chunks = capacity.div_ceil(chunk_size);
        let chunk_layout = Layout::from_size_align(stride * chunk_size, layout.align())?;

        let chunks = (0..num_chunks)
            .map(|_| {
                // SAFETY: `chunk_layout` has a non-zero size.
                let raw = unsafe { alloc::alloc(chunk_layout) };
                let base = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(chunk_layout));
                Chunk {
                    base,
                    layout: chunk_layout,
                }
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        // Popped from the back, so slot 0 goes out first.
        let free_slots = (0..capacity).rev().collect::<Vec<_>>();

        debug!(
            size = layout.size(),
            align = layout.align(),
            chunk_size,
            capacity,
            num_chunks,
            "chunk allocator reserved"
        );

        Ok(Self {
            layout,
            stride,
            chunk_size,
            capacity,
            chunks,
            free_slots: Mutex::new(free_slots),
            stats: AllocStats::new(),
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Slots not currently handed out.
    pub fn available(&self) -> usize {
        self.free_slots.lock().len()
    }

    pub fn stats(&self) -> AllocStatsSnapshot {
        self.stats.snapshot()
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        let chunk = &self.chunks[index / self.chunk_size];
        let offset = (index % self.chunk_size) * self.stride;
        // SAFETY: `offset` is inside the chunk, which is a live allocation.
        unsafe { NonNull::new_unchecked(chunk.base.as_ptr().add(offset)) }
    }

    fn slot_index(&self, elem: NonNull<u8>) -> Option<usize> {
        let addr = elem.as_ptr() as usize;
        self.chunks.iter().enumerate().find_map(|(i, chunk)| {
            let base = chunk.base.as_ptr() as usize;
            let offset = addr.checked_sub(base)?;
            if offset >= chunk.layout.size() || offset % self.stride != 0 {
                return None;
            }
            Some(i * self.chunk_size + offset / self.stride)
        })
    }
}

impl BackingAllocator for ChunkAllocator {
    fn layout(&self) -> Layout {
        self.layout
    }

    fn alloc(&self, flags: AllocFlags) -> Option<NonNull<u8>> {
        let Some(index) = self.free_slots.lock().pop() else {
            self.stats.increment_failures();
            return None;
        };

        let ptr = self.slot_ptr(index);
        if flags.contains(AllocFlags::ZERO) {
            // SAFETY: the slot is `layout.size()` bytes and exclusively ours.
            unsafe { ptr.as_ptr().write_bytes(0, self.layout.size()) };
        }
        self.stats.increment_allocations();
        Some(ptr)
    }

    unsafe fn free(&self, elem: NonNull<u8>) {
        let index = self.slot_index(elem);
        assert!(
            matches!(index, Some(i) if i < self.capacity),
            "pointer {:p} does not belong to this chunk allocator",
            elem
        );
        if let Some(index) = index {
            self.free_slots.lock().push(index);
            self.stats.increment_deallocations();
        }
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        for chunk in self.chunks.iter() {
            // SAFETY: allocated in `new` with exactly this layout.
            unsafe { alloc::dealloc(chunk.base.as_ptr(), chunk.layout) };
        }
    }
}

impl std::fmt::Debug for ChunkAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkAllocator")
            .field("layout", &self.layout)
            .field("chunk_size", &self.chunk_size)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
