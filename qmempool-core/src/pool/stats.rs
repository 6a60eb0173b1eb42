//! Pool-wide and per-CPU counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Pool-wide counters, all relaxed and advisory.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    backing_allocs: AtomicU64,
    backing_frees: AtomicU64,
    shared_refills: AtomicU64,
    backing_drains: AtomicU64,
}

impl PoolStats {
    #[inline]
    pub(crate) fn count_backing_alloc(&self) {
        self.backing_allocs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn count_backing_free(&self) {
        self.backing_frees.fetch_add(1, Ordering::Relaxed);
    }

    /// The shared queue was refilled from the backing allocator.
    #[inline]
    pub(crate) fn count_shared_refill(&self) {
        self.shared_refills.fetch_add(1, Ordering::Relaxed);
    }

    /// The shared queue overflowed and was shrunk into the backing allocator.
    #[inline]
    pub(crate) fn count_backing_drain(&self) {
        self.backing_drains.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, shared_len: usize, preallocated: usize) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            backing_allocs: self.backing_allocs.load(Ordering::Relaxed),
            backing_frees: self.backing_frees.load(Ordering::Relaxed),
            shared_refills: self.shared_refills.load(Ordering::Relaxed),
            backing_drains: self.backing_drains.load(Ordering::Relaxed),
            shared_len,
            preallocated,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Elements obtained from the backing allocator, preallocation included.
    pub backing_allocs: u64,
    /// Elements returned to the backing allocator.
    pub backing_frees: u64,
    /// Slowest-path allocations that refilled the shared queue.
    pub shared_refills: u64,
    /// Free-path overflows that shrank the shared queue. The same event
    /// is counted per CPU in [`CpuStatsSnapshot::drain_count`], so this is
    /// their sum.
    pub backing_drains: u64,
    pub shared_len: usize,
    pub preallocated: usize,
}

impl PoolStatsSnapshot {
    /// Elements currently resident in any tier or held by callers.
    pub fn outstanding(&self) -> u64 {
        self.backing_allocs.saturating_sub(self.backing_frees)
    }
}

/// Point-in-time counters of one CPU's local cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuStatsSnapshot {
    pub cpu: usize,
    /// Last CPU id that leased this cache, if any.
    pub owner_cpu: Option<usize>,
    /// Refills of the local queue from the shared queue.
    pub refill_count: u64,
    /// Frees that found the local queue full.
    pub full_count: u64,
    /// Of those, overflows that found the shared queue full as well. Summed
    /// over CPUs this equals [`PoolStatsSnapshot::backing_drains`].
    pub drain_count: u64,
    pub local_len: usize,
}
