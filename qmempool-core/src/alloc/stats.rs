//! ## qmempool-core::alloc::stats
//! **Backing allocator call accounting**
//!
//! Counters every backing allocator in this crate carries, so tests and the
//! CLI can check that each element produced was reclaimed exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Thread-safe allocation counters.
///
/// All updates are relaxed: the counters are advisory and never used to
/// order memory accesses.
#[derive(Debug, Default)]
pub struct AllocStats {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    failures: AtomicUsize,
}

/// Point-in-time copy of [`AllocStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocStatsSnapshot {
    pub allocations: usize,
    pub deallocations: usize,
    pub failures: usize,
}

impl AllocStatsSnapshot {
    /// Elements handed out and not yet reclaimed.
    pub fn live(&self) -> usize {
        self.allocations.saturating_sub(self.deallocations)
    }
}

impl AllocStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_allocations(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_deallocations(&self) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an allocation request the allocator could not satisfy.
    #[inline]
    pub fn increment_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AllocStatsSnapshot {
        AllocStatsSnapshot {
            allocations: self.allocations(),
            deallocations: self.deallocations(),
            failures: self.failures(),
        }
    }
}
