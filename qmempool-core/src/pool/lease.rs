//! CPU leases: the fast paths of allocate and free.

use tracing::trace;

use super::element::{Element, RawElem};
use super::percpu::LocalCache;
use super::{Pool, BULK};
use crate::alloc::{AllocFlags, BackingAllocator};
use crate::error::OutOfMemory;

/// Exclusive use of one CPU's local cache.
///
/// Obtained from [`Pool::lease`]; released on drop. While a lease exists no
/// other context can touch the same local cache, which is what makes the
/// single-producer/single-consumer ring operations below sound. A worker
/// typically holds its lease for its whole lifetime, the way kernel code
/// keeps preemption disabled across an allocate or free.
pub struct CpuLease<'pool, B: BackingAllocator + ?Sized> {
    pool: &'pool Pool<B>,
    cpu: usize,
}

impl<'pool, B: BackingAllocator + ?Sized> CpuLease<'pool, B> {
    pub(super) fn new(pool: &'pool Pool<B>, cpu: usize) -> Self {
        Self { pool, cpu }
    }

    /// CPU (shard) index this lease covers.
    #[inline]
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    #[inline]
    pub fn pool(&self) -> &'pool Pool<B> {
        self.pool
    }

    /// Elements currently cached for this CPU.
    #[inline]
    pub fn local_len(&self) -> usize {
        self.cache().queue.len()
    }

    #[inline]
    fn cache(&self) -> &'pool LocalCache {
        &self.pool.caches[self.cpu]
    }

    /// Takes one element, refilling from the shared queue or the backing
    /// allocator when the local cache is empty.
    ///
    /// `OutOfMemory` is returned only when every tier is empty and the
    /// backing allocator cannot produce the element for this call.
    #[inline]
    pub fn allocate(&mut self, flags: AllocFlags) -> Result<Element, OutOfMemory> {
        let cache = self.cache();

        // SAFETY: the lease makes this the only consumer of `cache.queue`.
        if let Some(raw) = unsafe { cache.queue.sc_dequeue() } {
            return Ok(self.pool.tag(raw));
        }

        if let Some(raw) = self.refill_from_shared(cache) {
            return Ok(self.pool.tag(raw));
        }

        trace!(cpu = self.cpu, "shared queue empty, allocating from backing");
        self.pool
            .alloc_from_backing(flags)
            .map(|raw| self.pool.tag(raw))
    }

    /// Pulls one `BULK` batch from the shared queue, returns its first
    /// element and parks the rest in the (empty) local cache.
    fn refill_from_shared(&self, cache: &LocalCache) -> Option<RawElem> {
        let mut elems = [RawElem::DANGLING; BULK];
        self.pool.shared.mc_dequeue_bulk(&mut elems).ok()?;

        // SAFETY: the lease makes this the only producer of `cache.queue`.
        let res = unsafe { cache.queue.sp_enqueue_bulk(&elems[1..]) };
        assert!(
            res.is_ok(),
            "local queue of cpu {} rejected a refill it was just observed empty for",
            self.cpu
        );
        cache.count_refill();
        Some(elems[0])
    }

    /// Returns an element to this CPU's cache, overflowing to the shared
    /// queue and then to the backing allocator as tiers fill up.
    ///
    /// # Panics
    ///
    /// If `elem` belongs to a different pool.
    #[inline]
    pub fn free(&mut self, elem: Element) {
        let raw = self.pool.untag(elem);
        let cache = self.cache();

        // SAFETY: the lease makes this the only producer of `cache.queue`.
        if unsafe { cache.queue.sp_enqueue(raw) }.is_ok() {
            return;
        }
        cache.count_full();

        // The freed element plus BULK - 1 cached ones form one batch.
        let mut batch = [RawElem::DANGLING; BULK];
        batch[0] = raw;
        // SAFETY: the lease makes this the only consumer of `cache.queue`.
        let res = unsafe { cache.queue.sc_dequeue_bulk(&mut batch[1..]) };
        assert!(
            res.is_ok(),
            "local queue of cpu {} reported full with fewer than {} elements",
            self.cpu,
            BULK - 1
        );

        if self.pool.shared.mp_enqueue_bulk(&batch).is_err() {
            trace!(cpu = self.cpu, "shared queue full, draining to backing");
            self.pool.free_to_backing(&mut batch);
            cache.count_drain();
        }
    }
}

impl<B: BackingAllocator + ?Sized> Drop for CpuLease<'_, B> {
    fn drop(&mut self) {
        self.cache().release();
    }
}

impl<B: BackingAllocator + ?Sized> std::fmt::Debug for CpuLease<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuLease")
            .field("pool", &self.pool.id())
            .field("cpu", &self.cpu)
            .finish()
    }
}
