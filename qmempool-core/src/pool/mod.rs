//! ## qmempool-core::pool
//! **Two-tier per-CPU element pool**
//!
//! Elements flow through three tiers:
//!
//! ```text
//!   allocate                               free
//!      |                                     |
//!   [local cache, SPSC]  <- lease ->  [local cache, SPSC]
//!      | empty: BULK from shared             | full: BULK to shared
//!   [shared queue, MPMC]               [shared queue, MPMC]
//!      | empty: 1 + REFILL x BULK            | full: (1 + REFILL) x BULK
//!   [backing allocator]                [backing allocator]
//! ```
//!
//! The shared queue is the only cross-CPU structure and is lock-free. The
//! local caches are reached through a [`CpuLease`], which guarantees the
//! single-producer/single-consumer protocol their rings rely on.
//!
//! Invariant violations (a bulk ring operation failing where the capacity
//! arithmetic says it cannot) panic. They mean element loss or duplication
//! is already possible, so there is no recovery path.

mod element;
mod lease;
mod percpu;
mod stats;

pub use element::Element;
pub use lease::CpuLease;
pub use stats::{CpuStatsSnapshot, PoolStatsSnapshot};

use std::alloc::Layout;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::alloc::{AllocFlags, BackingAllocator};
use crate::error::{CreateError, LeaseError, OutOfMemory};
use crate::ring::{Ring, RingFlags};
use element::RawElem;
use percpu::LocalCache;
use stats::PoolStats;

/// Elements moved per bulk transfer between tiers.
pub const BULK: usize = 16;

/// `BULK` batches pushed into the shared queue per backing-allocator refill,
/// and pulled out of it per overflow drain.
pub const REFILL_MULTIPLIER: usize = 2;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Builder for [`Pool`].
///
/// ```
/// use std::sync::Arc;
/// use qmempool_core::prelude::*;
///
/// let backing = Arc::new(HeapAllocator::with_size(256, 64).unwrap());
/// let pool = PoolBuilder::new()
///     .local_capacity(64)
///     .shared_capacity(1024)
///     .preallocate(256)
///     .cpus(4)
///     .backing(backing)
///     .build()
///     .unwrap();
/// assert_eq!(pool.stats().shared_len, 256);
/// ```
pub struct PoolBuilder<B: BackingAllocator + ?Sized = dyn BackingAllocator> {
    local_capacity: usize,
    shared_capacity: usize,
    preallocate: usize,
    cpus: Option<usize>,
    backing: Option<Arc<B>>,
    flags: AllocFlags,
}

impl<B: BackingAllocator + ?Sized> Default for PoolBuilder<B> {
    fn default() -> Self {
        Self {
            local_capacity: 64,
            shared_capacity: 1024,
            preallocate: 0,
            cpus: None,
            backing: None,
            flags: AllocFlags::NONE,
        }
    }
}

impl<B: BackingAllocator + ?Sized> PoolBuilder<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of each per-CPU ring (power of two, at least `BULK`).
    pub fn local_capacity(mut self, size: usize) -> Self {
        self.local_capacity = size;
        self
    }

    /// Size of the shared ring (power of two, above `BULK * REFILL_MULTIPLIER`).
    pub fn shared_capacity(mut self, size: usize) -> Self {
        self.shared_capacity = size;
        self
    }

    /// Elements pushed into the shared ring at creation.
    pub fn preallocate(mut self, count: usize) -> Self {
        self.preallocate = count;
        self
    }

    /// Number of per-CPU shards. Defaults to the number of logical CPUs.
    pub fn cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn backing(mut self, backing: Arc<B>) -> Self {
        self.backing = Some(backing);
        self
    }

    /// Flags used for preallocation.
    pub fn flags(mut self, flags: AllocFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Validates the parameters, then builds and pre-fills the pool.
    ///
    /// No backing allocator call happens unless every check passes. A
    /// failure after that point returns all elements produced so far.
    pub fn build(self) -> Result<Pool<B>, CreateError> {
        let Self {
            local_capacity: local,
            shared_capacity: shared,
            preallocate: prealloc,
            cpus,
            backing,
            flags,
        } = self;

        if local < BULK {
            error!(local, "local queue too small for bulking");
            return Err(CreateError::LocalTooSmall { local });
        }
        if shared <= BULK * REFILL_MULTIPLIER {
            error!(shared, "shared queue too small for bulk refill");
            return Err(CreateError::SharedTooSmall { shared });
        }
        if !local.is_power_of_two() || !shared.is_power_of_two() {
            error!(local, shared, "queue sizes must be power of two");
            return Err(CreateError::NotPowerOfTwo { local, shared });
        }
        if prealloc >= shared {
            error!(prealloc, shared, "preallocation does not fit shared queue");
            return Err(CreateError::PreallocTooLarge { prealloc, shared });
        }
        if prealloc % BULK != 0 {
            warn!(prealloc, bulk = BULK, "preallocation should be divisible by bulk size");
        }
        let backing = backing.ok_or(CreateError::MissingBacking)?;
        let cpus = cpus.unwrap_or_else(num_cpus::get);
        if cpus == 0 {
            return Err(CreateError::NoCpus);
        }

        Pool::construct(local, shared, prealloc, cpus, backing, flags)
    }
}

/// Per-CPU cached pool of fixed-size elements drawn from a backing allocator.
pub struct Pool<B: BackingAllocator + ?Sized = dyn BackingAllocator> {
    id: u64,
    backing: Arc<B>,
    flags: AllocFlags,
    shared: Ring<RawElem>,
    prealloc: usize,
    local_capacity: usize,
    caches: Box<[LocalCache]>,
    stats: PoolStats,
}

impl<B: BackingAllocator + ?Sized> Pool<B> {
    /// Creates a pool with one local cache per logical CPU.
    pub fn create(
        local_capacity: usize,
        shared_capacity: usize,
        preallocate: usize,
        backing: Arc<B>,
        flags: AllocFlags,
    ) -> Result<Self, CreateError> {
        PoolBuilder::new()
            .local_capacity(local_capacity)
            .shared_capacity(shared_capacity)
            .preallocate(preallocate)
            .backing(backing)
            .flags(flags)
            .build()
    }

    fn construct(
        local: usize,
        shared: usize,
        prealloc: usize,
        cpus: usize,
        backing: Arc<B>,
        flags: AllocFlags,
    ) -> Result<Self, CreateError> {
        // Built up in place: an early return drops `pool`, and `Drop`
        // hands back whatever has been allocated so far.
        let mut pool = Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            backing,
            flags,
            shared: Ring::new(shared, RingFlags::MPMC)?,
            prealloc,
            local_capacity: local,
            caches: Box::new([]),
            stats: PoolStats::default(),
        };

        for allocated in 0..prealloc {
            let Some(elem) = pool.backing_alloc(flags) else {
                error!(allocated, requested = prealloc, "backing allocator out of memory during preallocation");
                return Err(CreateError::PreallocExhausted {
                    allocated,
                    requested: prealloc,
                });
            };
            let res = pool.shared.mp_enqueue(elem);
            assert!(res.is_ok(), "shared queue rejected preallocated element {}", allocated);
        }

        pool.caches = (0..cpus)
            .map(|_| LocalCache::new(local))
            .collect::<Result<Vec<_>, _>>()?
            .into_boxed_slice();

        debug!(
            pool = pool.id,
            local, shared, prealloc, cpus, "pool created"
        );
        Ok(pool)
    }

    /// Reserves CPU `cpu` for exclusive use of its local cache.
    pub fn lease(&self, cpu: usize) -> Result<CpuLease<'_, B>, LeaseError> {
        let cache = self.caches.get(cpu).ok_or(LeaseError::InvalidCpu {
            cpu,
            cpus: self.caches.len(),
        })?;
        if !cache.try_acquire(cpu) {
            return Err(LeaseError::Busy(cpu));
        }
        Ok(CpuLease::new(self, cpu))
    }

    /// Drains every tier into the backing allocator and releases the pool.
    ///
    /// # Panics
    ///
    /// If a ring is not empty after draining, which means an element was
    /// duplicated or a concurrent user violated the lease protocol.
    pub fn destroy(self) {
        drop(self);
    }

    /// Unique id of this pool; every [`Element`] carries it.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Layout of every element.
    pub fn element_layout(&self) -> Layout {
        self.backing.layout()
    }

    pub fn backing(&self) -> &Arc<B> {
        &self.backing
    }

    pub fn flags(&self) -> AllocFlags {
        self.flags
    }

    pub fn cpus(&self) -> usize {
        self.caches.len()
    }

    /// Configured size of each local ring.
    pub fn local_capacity(&self) -> usize {
        self.local_capacity
    }

    /// Configured size of the shared ring.
    pub fn shared_capacity(&self) -> usize {
        self.shared.capacity() + 1
    }

    pub fn preallocated(&self) -> usize {
        self.prealloc
    }

    /// Elements in the shared queue. Racy under concurrent use.
    pub fn shared_len(&self) -> usize {
        self.shared.len()
    }

    /// Elements cached for `cpu`. Racy under concurrent use.
    pub fn local_len(&self, cpu: usize) -> Option<usize> {
        self.caches.get(cpu).map(|cache| cache.queue.len())
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot(self.shared.len(), self.prealloc)
    }

    pub fn cpu_stats(&self, cpu: usize) -> Option<CpuStatsSnapshot> {
        self.caches.get(cpu).map(|cache| cache.snapshot(cpu))
    }

    pub fn cpu_stats_all(&self) -> Vec<CpuStatsSnapshot> {
        self.caches
            .iter()
            .enumerate()
            .map(|(cpu, cache)| cache.snapshot(cpu))
            .collect()
    }

    #[inline]
    fn tag(&self, raw: RawElem) -> Element {
        Element::new(raw, self.id)
    }

    #[inline]
    fn untag(&self, elem: Element) -> RawElem {
        let (raw, pool_id) = elem.into_raw();
        assert_eq!(
            pool_id, self.id,
            "element of pool {} released into pool {}",
            pool_id, self.id
        );
        raw
    }

    #[inline]
    fn backing_alloc(&self, flags: AllocFlags) -> Option<RawElem> {
        let ptr = self.backing.alloc(flags)?;
        self.stats.count_backing_alloc();
        Some(RawElem(ptr))
    }

    #[inline]
    fn backing_free(&self, elem: RawElem) {
        // SAFETY: every element resident in or released to this pool was
        // produced by `self.backing` and is owned by exactly one tier.
        unsafe { self.backing.free(elem.0) };
        self.stats.count_backing_free();
    }

    /// Slowest path: satisfies the caller straight from the backing
    /// allocator, then refills the shared queue with up to
    /// `REFILL_MULTIPLIER` batches. The local cache is left for the next
    /// allocation to refill from the shared queue.
    fn alloc_from_backing(&self, flags: AllocFlags) -> Result<RawElem, OutOfMemory> {
        let Some(elem) = self.backing_alloc(flags) else {
            if !flags.contains(AllocFlags::NO_WARN) {
                error!(pool = self.id, "backing allocator depleted");
            }
            return Err(OutOfMemory);
        };
        self.stats.count_shared_refill();

        let mut elems = [RawElem::DANGLING; BULK];
        for _ in 0..REFILL_MULTIPLIER {
            let mut filled = 0;
            while filled < BULK {
                match self.backing_alloc(flags) {
                    Some(e) => {
                        elems[filled] = e;
                        filled += 1;
                    }
                    None => break,
                }
            }

            let res = self.shared.mp_enqueue_bulk(&elems[..filled]);
            assert!(
                res.is_ok(),
                "shared queue full while refilling {} elements from backing",
                filled
            );

            if filled < BULK {
                if !flags.contains(AllocFlags::NO_WARN) {
                    warn!(pool = self.id, filled, "backing allocator depleted during shared refill");
                }
                break;
            }
        }

        Ok(elem)
    }

    /// Releases an overflow batch to the backing allocator, then shrinks
    /// the (full) shared queue by `REFILL_MULTIPLIER` batches.
    fn free_to_backing(&self, elems: &mut [RawElem; BULK]) {
        for elem in elems.iter() {
            self.backing_free(*elem);
        }

        for round in 0..REFILL_MULTIPLIER {
            let res = self.shared.mc_dequeue_bulk(elems);
            assert!(
                res.is_ok(),
                "shared queue ran dry in shrink round {} after reporting full",
                round
            );
            for elem in elems.iter() {
                self.backing_free(*elem);
            }
        }
        self.stats.count_backing_drain();
    }

    fn drain_ring(&self, ring: &Ring<RawElem>, name: &str) {
        while let Some(elem) = ring.mc_dequeue() {
            self.backing_free(elem);
        }
        assert!(ring.is_empty(), "{} queue not empty after drain", name);
    }
}

impl<B: BackingAllocator + ?Sized> Drop for Pool<B> {
    fn drop(&mut self) {
        for cache in self.caches.iter() {
            self.drain_ring(&cache.queue, "local");
        }
        self.drain_ring(&self.shared, "shared");

        let stats = self.stats.snapshot(0, self.prealloc);
        debug!(
            pool = self.id,
            backing_allocs = stats.backing_allocs,
            backing_frees = stats.backing_frees,
            "pool destroyed"
        );
    }
}

impl<B: BackingAllocator + ?Sized> std::fmt::Debug for Pool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("cpus", &self.caches.len())
            .field("local_capacity", &self.local_capacity)
            .field("shared", &self.shared)
            .field("prealloc", &self.prealloc)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tracing_test::traced_test;

    fn heap() -> Arc<HeapAllocator> {
        Arc::new(HeapAllocator::with_size(64, 8).unwrap())
    }

    fn pool_with(
        heap: &Arc<HeapAllocator>,
        local: usize,
        shared: usize,
        prealloc: usize,
        cpus: usize,
    ) -> Result<Pool<HeapAllocator>, CreateError> {
        PoolBuilder::new()
            .local_capacity(local)
            .shared_capacity(shared)
            .preallocate(prealloc)
            .cpus(cpus)
            .backing(Arc::clone(heap))
            .build()
    }

    #[test]
    fn rejects_invalid_sizes_without_allocating() {
        let heap = heap();
        assert!(matches!(
            pool_with(&heap, 8, 64, 0, 1),
            Err(CreateError::LocalTooSmall { local: 8 })
        ));
        assert!(matches!(
            pool_with(&heap, 16, 32, 0, 1),
            Err(CreateError::SharedTooSmall { shared: 32 })
        ));
        assert!(matches!(
            pool_with(&heap, 24, 64, 0, 1),
            Err(CreateError::NotPowerOfTwo { local: 24, shared: 64 })
        ));
        assert!(matches!(
            pool_with(&heap, 16, 96, 0, 1),
            Err(CreateError::NotPowerOfTwo { local: 16, shared: 96 })
        ));
        assert!(matches!(
            pool_with(&heap, 16, 64, 64, 1),
            Err(CreateError::PreallocTooLarge { prealloc: 64, shared: 64 })
        ));
        assert!(matches!(
            pool_with(&heap, 16, 64, 0, 0),
            Err(CreateError::NoCpus)
        ));
        assert_eq!(heap.stats().allocations, 0);
    }

    #[test]
    fn rejects_missing_backing() {
        let err = PoolBuilder::<HeapAllocator>::new()
            .local_capacity(16)
            .shared_capacity(64)
            .build()
            .unwrap_err();
        assert!(matches!(err, CreateError::MissingBacking));
        assert!(err.is_config());
    }

    #[traced_test]
    #[test]
    fn warns_on_preallocation_not_divisible_by_bulk() {
        let heap = heap();
        let pool = pool_with(&heap, 16, 64, 20, 1).unwrap();
        assert!(logs_contain("preallocation should be divisible by bulk size"));
        assert_eq!(pool.shared_len(), 20);
    }

    #[test]
    fn preallocation_failure_rolls_back() {
        let heap = Arc::new(HeapAllocator::with_size(64, 8).unwrap().with_limit(10));
        let err = pool_with(&heap, 16, 64, 32, 1).unwrap_err();
        assert!(matches!(
            err,
            CreateError::PreallocExhausted {
                allocated: 10,
                requested: 32
            }
        ));
        assert!(!err.is_config());
        assert_eq!(heap.live(), 0);
        assert_eq!(heap.stats().deallocations, 10);
    }

    #[test]
    fn create_uses_one_cache_per_cpu() {
        let pool = Pool::create(16, 64, 32, heap(), AllocFlags::NONE).unwrap();
        assert_eq!(pool.cpus(), num_cpus::get());
        assert_eq!(pool.shared_capacity(), 64);
        assert_eq!(pool.local_capacity(), 16);
        assert!(pool.cpu_stats_all().iter().all(|s| s.owner_cpu.is_none()));
    }

    #[test]
    fn lease_is_exclusive_per_cpu() {
        let pool = pool_with(&heap(), 16, 64, 0, 2).unwrap();
        let lease = pool.lease(0).unwrap();
        assert!(matches!(pool.lease(0), Err(LeaseError::Busy(0))));
        assert!(matches!(
            pool.lease(2),
            Err(LeaseError::InvalidCpu { cpu: 2, cpus: 2 })
        ));
        let other = pool.lease(1).unwrap();
        drop(lease);
        assert!(pool.lease(0).is_ok());
        assert_eq!(other.cpu(), 1);
        assert_eq!(pool.cpu_stats(1).unwrap().owner_cpu, Some(1));
    }

    #[test]
    fn scenario_prefilled_pool_refills_once() {
        let heap = heap();
        let pool = pool_with(&heap, 16, 64, 32, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();
        let mut held = Vec::new();

        for _ in 0..32 {
            held.push(lease.allocate(AllocFlags::NONE).unwrap());
        }
        assert_eq!(heap.stats().allocations, 32);
        assert_eq!(pool.stats().shared_refills, 0);

        for _ in 32..40 {
            held.push(lease.allocate(AllocFlags::NONE).unwrap());
        }
        let stats = pool.stats();
        assert_eq!(stats.shared_refills, 1);
        assert_eq!(heap.stats().allocations, 32 + 1 + BULK * REFILL_MULTIPLIER);
        assert_eq!(stats.shared_len, BULK);
        assert_eq!(lease.local_len(), 9);

        for elem in held.drain(..) {
            lease.free(elem);
        }
        let cpu = pool.cpu_stats(0).unwrap();
        assert_eq!(cpu.full_count, 3);
        assert_eq!(cpu.drain_count, 1);
        assert_eq!(pool.stats().backing_drains, cpu.drain_count);
        assert_eq!(lease.local_len(), 1);
        assert_eq!(pool.shared_len(), BULK);
        assert_eq!(
            heap.stats().deallocations,
            BULK * (REFILL_MULTIPLIER + 1)
        );

        drop(lease);
        pool.destroy();
        let stats = heap.stats();
        assert_eq!(stats.allocations, stats.deallocations);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn refill_from_empty_pool() {
        let heap = heap();
        let pool = pool_with(&heap, 16, 64, 0, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();

        let first = lease.allocate(AllocFlags::NONE).unwrap();
        assert_eq!(heap.stats().allocations, 1 + BULK * REFILL_MULTIPLIER);
        assert_eq!(pool.shared_len(), BULK * REFILL_MULTIPLIER);
        assert_eq!(lease.local_len(), 0);

        let second = lease.allocate(AllocFlags::NONE).unwrap();
        assert_eq!(pool.shared_len(), (REFILL_MULTIPLIER - 1) * BULK);
        assert_eq!(lease.local_len(), BULK - 1);
        assert_eq!(pool.cpu_stats(0).unwrap().refill_count, 1);

        let mut held = vec![first, second];
        while held.len() < 1 + BULK * REFILL_MULTIPLIER {
            held.push(lease.allocate(AllocFlags::NONE).unwrap());
        }
        assert_eq!(heap.stats().allocations, held.len());
        let addrs: HashSet<usize> = held.iter().map(Element::addr).collect();
        assert_eq!(addrs.len(), held.len());

        for elem in held {
            lease.free(elem);
        }
    }

    #[test]
    fn round_trip_keeps_occupancy() {
        let pool = pool_with(&heap(), 16, 64, 32, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();
        let warm = lease.allocate(AllocFlags::NONE).unwrap();

        let (local, shared) = (lease.local_len(), pool.shared_len());
        let elem = lease.allocate(AllocFlags::NONE).unwrap();
        lease.free(elem);
        assert_eq!((lease.local_len(), pool.shared_len()), (local, shared));

        lease.free(warm);
    }

    #[test]
    fn overflow_moves_one_batch_per_bulk_frees() {
        let heap = heap();
        let pool = pool_with(&heap, 64, 256, 0, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();
        let held: Vec<_> = (0..63 + 3 * BULK)
            .map(|_| lease.allocate(AllocFlags::NONE).unwrap())
            .collect();
        let shared_before = pool.shared_len();
        let local_before = lease.local_len();

        let mut held = held.into_iter();
        for elem in held.by_ref().take(63 - local_before) {
            lease.free(elem);
        }
        assert_eq!(lease.local_len(), 63);
        assert_eq!(pool.cpu_stats(0).unwrap().full_count, 0);

        for round in 1..=3u64 {
            for elem in held.by_ref().take(BULK) {
                lease.free(elem);
            }
            assert_eq!(pool.cpu_stats(0).unwrap().full_count, round);
        }
        assert_eq!(pool.shared_len(), shared_before + 3 * BULK);
        assert_eq!(pool.cpu_stats(0).unwrap().drain_count, 0);

        for elem in held {
            lease.free(elem);
        }
    }

    #[test]
    fn out_of_memory_only_when_backing_is_exhausted() {
        let heap = Arc::new(HeapAllocator::with_size(64, 8).unwrap().with_limit(1));
        let pool = pool_with(&heap, 16, 64, 0, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();

        let elem = lease.allocate(AllocFlags::NO_WARN).unwrap();
        assert_eq!(pool.shared_len(), 0);
        assert_eq!(lease.allocate(AllocFlags::NO_WARN).unwrap_err(), OutOfMemory);

        lease.free(elem);
        let again = lease.allocate(AllocFlags::NONE).unwrap();
        lease.free(again);
    }

    #[traced_test]
    #[test]
    fn partial_refill_keeps_what_was_allocated() {
        let heap = Arc::new(HeapAllocator::with_size(64, 8).unwrap().with_limit(10));
        let pool = pool_with(&heap, 16, 64, 0, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();

        let elem = lease.allocate(AllocFlags::NONE).unwrap();
        assert_eq!(pool.shared_len(), 9);
        assert!(logs_contain("backing allocator depleted during shared refill"));

        // Fewer than BULK left in the shared queue cannot be bulk-dequeued.
        assert!(lease.allocate(AllocFlags::NONE).is_err());
        assert!(logs_contain("backing allocator depleted"));

        lease.free(elem);
        drop(lease);
        pool.destroy();
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn zero_flag_reaches_backing() {
        let pool = pool_with(&heap(), 16, 64, 0, 1).unwrap();
        let mut lease = pool.lease(0).unwrap();
        let elem = lease.allocate(AllocFlags::ZERO).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(elem.as_ptr().as_ptr(), 64) };
        assert!(bytes.iter().all(|b| *b == 0));
        lease.free(elem);
    }

    #[test]
    #[should_panic(expected = "released into pool")]
    fn foreign_element_is_fatal() {
        let a = pool_with(&heap(), 16, 64, 16, 1).unwrap();
        let b = pool_with(&heap(), 16, 64, 16, 1).unwrap();
        let elem = a.lease(0).unwrap().allocate(AllocFlags::NONE).unwrap();
        b.lease(0).unwrap().free(elem);
    }

    #[test]
    fn concurrent_cpus_conserve_elements() {
        const CPUS: usize = 4;
        const BURST: usize = 40;
        const ROUNDS: usize = 200;

        let heap = heap();
        let pool = pool_with(&heap, 64, 1024, 256, CPUS).unwrap();

        for _ in 0..ROUNDS {
            // Each CPU allocates a burst; its neighbour frees it.
            let bursts: Vec<Vec<Element>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..CPUS)
                    .map(|cpu| {
                        let pool = &pool;
                        s.spawn(move || {
                            let mut lease = pool.lease(cpu).unwrap();
                            (0..BURST)
                                .map(|_| lease.allocate(AllocFlags::NONE).unwrap())
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let addrs: HashSet<usize> = bursts.iter().flatten().map(Element::addr).collect();
            assert_eq!(addrs.len(), CPUS * BURST);

            std::thread::scope(|s| {
                for (cpu, burst) in bursts.into_iter().enumerate() {
                    let pool = &pool;
                    s.spawn(move || {
                        let mut lease = pool.lease((cpu + 1) % CPUS).unwrap();
                        for elem in burst {
                            lease.free(elem);
                        }
                    });
                }
            });
        }

        let cpu_stats = pool.cpu_stats_all();
        let resident: usize = cpu_stats.iter().map(|s| s.local_len).sum::<usize>()
            + pool.shared_len();
        assert_eq!(pool.stats().outstanding() as usize, resident);
        assert_eq!(
            pool.stats().backing_drains,
            cpu_stats.iter().map(|s| s.drain_count).sum::<u64>()
        );

        pool.destroy();
        assert_eq!(heap.live(), 0);
    }

    proptest! {
        #[test]
        fn conservation_over_random_sequences(ops in prop::collection::vec((0usize..2, any::<bool>()), 1..400)) {
            let heap = heap();
            let pool = pool_with(&heap, 16, 64, 16, 2).unwrap();
            let mut leases = [pool.lease(0).unwrap(), pool.lease(1).unwrap()];
            let mut held: Vec<Element> = Vec::new();

            for (cpu, alloc) in ops {
                if alloc || held.is_empty() {
                    held.push(leases[cpu].allocate(AllocFlags::NONE).unwrap());
                } else {
                    let elem = held.swap_remove(held.len() / 2);
                    leases[cpu].free(elem);
                }

                let resident = pool.shared_len()
                    + leases.iter().map(CpuLease::local_len).sum::<usize>();
                prop_assert_eq!(pool.stats().outstanding() as usize, resident + held.len());
                prop_assert_eq!(heap.live(), resident + held.len());
                prop_assert!(pool.shared_len() < pool.shared_capacity());
            }

            let addrs: HashSet<usize> = held.iter().map(Element::addr).collect();
            prop_assert_eq!(addrs.len(), held.len());

            for (i, elem) in held.into_iter().enumerate() {
                leases[i % 2].free(elem);
            }
            drop(leases);
            pool.destroy();
            prop_assert_eq!(heap.live(), 0);
            prop_assert_eq!(heap.stats().allocations, heap.stats().deallocations);
        }
    }
}
