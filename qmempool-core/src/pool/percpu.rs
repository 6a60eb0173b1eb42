//! Per-CPU local cache.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, Ordering};

use super::element::RawElem;
use super::stats::CpuStatsSnapshot;
use crate::ring::{Ring, RingError, RingFlags};

/// One CPU's private tier: an SPSC ring plus advisory counters.
///
/// The ring is single-producer/single-consumer by protocol. `leased` is
/// the protocol: only the holder of the lease touches `queue` through the
/// `sp_*`/`sc_*` paths.
#[repr(align(64))]
pub(crate) struct LocalCache {
    pub(crate) queue: Ring<RawElem>,
    refill_count: AtomicU64,
    full_count: AtomicU64,
    drain_count: AtomicU64,
    owner_cpu: AtomicIsize,
    leased: AtomicBool,
}

impl LocalCache {
    pub(crate) fn new(capacity: usize) -> Result<Self, RingError> {
        Ok(Self {
            queue: Ring::new(capacity, RingFlags::SPSC)?,
            refill_count: AtomicU64::new(0),
            full_count: AtomicU64::new(0),
            drain_count: AtomicU64::new(0),
            owner_cpu: AtomicIsize::new(-1),
            leased: AtomicBool::new(false),
        })
    }

    /// Takes exclusive use of this cache for `cpu`.
    #[inline]
    pub(crate) fn try_acquire(&self, cpu: usize) -> bool {
        let acquired = self
            .leased
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if acquired {
            self.owner_cpu.store(cpu as isize, Ordering::Relaxed);
        }
        acquired
    }

    #[inline]
    pub(crate) fn release(&self) {
        self.leased.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn count_refill(&self) {
        self.refill_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn count_full(&self) {
        self.full_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn count_drain(&self) {
        self.drain_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cpu: usize) -> CpuStatsSnapshot {
        let owner = self.owner_cpu.load(Ordering::Relaxed);
        CpuStatsSnapshot {
            cpu,
            owner_cpu: usize::try_from(owner).ok(),
            refill_count: self.refill_count.load(Ordering::Relaxed),
            full_count: self.full_count.load(Ordering::Relaxed),
            drain_count: self.drain_count.load(Ordering::Relaxed),
            local_len: self.queue.len(),
        }
    }
}
