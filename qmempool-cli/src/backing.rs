//! Backing allocator selection from configuration.

use std::alloc::Layout;
use std::sync::Arc;

use qmempool_config::{BackingKind, PoolConfig};
use qmempool_core::alloc::{
    AllocStatsSnapshot, BackingAllocator, BackingError, ChunkAllocator, HeapAllocator,
};

const CHUNK_SLOTS: usize = 1024;

/// Concrete backing allocator, kept alongside the type-erased handle the
/// pool holds so its counters stay readable after the run.
pub enum Backing {
    Heap(Arc<HeapAllocator>),
    Chunk(Arc<ChunkAllocator>),
}

impl Backing {
    /// `headroom` is the number of elements callers may hold outside the
    /// pool at once. It sizes the chunk allocator when no limit is set.
    pub fn from_config(pool: &PoolConfig, headroom: usize) -> Result<Self, BackingError> {
        let layout = Layout::from_size_align(pool.element_size, pool.element_align)?;
        match pool.backing {
            BackingKind::Heap => {
                let mut heap = HeapAllocator::new(layout)?;
                if let Some(limit) = pool.backing_limit {
                    heap = heap.with_limit(limit);
                }
                Ok(Self::Heap(Arc::new(heap)))
            }
            BackingKind::Chunk => {
                let capacity = pool.backing_limit.unwrap_or(
                    pool.shared_capacity + pool.cpus * pool.local_capacity + headroom,
                );
                let chunks = ChunkAllocator::new(layout, CHUNK_SLOTS.min(capacity), capacity)?;
                Ok(Self::Chunk(Arc::new(chunks)))
            }
        }
    }

    pub fn allocator(&self) -> Arc<dyn BackingAllocator> {
        match self {
            Self::Heap(heap) => Arc::clone(heap) as Arc<dyn BackingAllocator>,
            Self::Chunk(chunks) => Arc::clone(chunks) as Arc<dyn BackingAllocator>,
        }
    }

    pub fn stats(&self) -> AllocStatsSnapshot {
        match self {
            Self::Heap(heap) => heap.stats(),
            Self::Chunk(chunks) => chunks.stats(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Heap(_) => "heap",
            Self::Chunk(_) => "chunk",
        }
    }
}
