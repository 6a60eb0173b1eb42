//! Single-CPU walkthrough of the allocation tiers.
//!
//! A 16/64 pool with 32 preallocated elements: the first 32 allocations
//! never reach the backing allocator, the next 8 trigger one shared refill,
//! and freeing all 40 overflows the local cache three times and the shared
//! queue once.

use std::sync::Arc;

use qmempool_config::PoolConfig;
use qmempool_core::alloc::{AllocFlags, AllocStatsSnapshot, HeapAllocator};
use qmempool_core::{Element, Pool, PoolBuilder};
use qmempool_telemetry::MetricsRecorder;
use tracing::info;

use crate::error::CliError;

const LOCAL: usize = 16;
const SHARED: usize = 64;
const PREALLOC: usize = 32;
const FIRST_WAVE: usize = 32;
const SECOND_WAVE: usize = 8;

struct Report<'a> {
    backing: &'a HeapAllocator,
    last: AllocStatsSnapshot,
}

impl<'a> Report<'a> {
    fn new(backing: &'a HeapAllocator) -> Self {
        println!(
            "{:<28} {:>8} {:>8} {:>6} {:>7}",
            "step", "allocs", "frees", "local", "shared"
        );
        Self {
            backing,
            last: AllocStatsSnapshot::default(),
        }
    }

    fn step(&mut self, name: &str, pool: Option<&Pool<HeapAllocator>>) {
        let now = self.backing.stats();
        let (local, shared) = match pool {
            Some(pool) => (pool.local_len(0).unwrap_or(0), pool.shared_len()),
            None => (0, 0),
        };
        println!(
            "{:<28} {:>+8} {:>+8} {:>6} {:>7}",
            name,
            now.allocations - self.last.allocations,
            now.deallocations - self.last.deallocations,
            local,
            shared
        );
        self.last = now;
    }
}

pub fn run_scenario(config: &PoolConfig, metrics: Option<&MetricsRecorder>) -> Result<(), CliError> {
    let backing = Arc::new(HeapAllocator::with_size(
        config.element_size,
        config.element_align,
    )?);
    info!(
        element_size = config.element_size,
        local = LOCAL,
        shared = SHARED,
        prealloc = PREALLOC,
        "running scenario"
    );

    let mut report = Report::new(&backing);
    let pool = PoolBuilder::new()
        .local_capacity(LOCAL)
        .shared_capacity(SHARED)
        .preallocate(PREALLOC)
        .cpus(1)
        .backing(Arc::clone(&backing))
        .build()?;
    report.step("create", Some(&pool));

    {
        let mut lease = pool.lease(0)?;
        let mut held: Vec<Element> = Vec::with_capacity(FIRST_WAVE + SECOND_WAVE);

        for _ in 0..FIRST_WAVE {
            held.push(lease.allocate(AllocFlags::NONE)?);
        }
        report.step("allocate 32 (cached)", Some(&pool));

        for _ in 0..SECOND_WAVE {
            held.push(lease.allocate(AllocFlags::NONE)?);
        }
        report.step("allocate 8 (refill)", Some(&pool));

        for elem in held.drain(..) {
            lease.free(elem);
        }
        report.step("free 40", Some(&pool));
    }

    let cpu = pool.cpu_stats(0).unwrap_or_default();
    println!(
        "cpu 0: refills {} full {} drains {}",
        cpu.refill_count, cpu.full_count, cpu.drain_count
    );
    if let Some(metrics) = metrics {
        metrics.record(&pool.stats(), &pool.cpu_stats_all());
    }

    pool.destroy();
    report.step("destroy", None);

    let totals = backing.stats();
    if totals.live() != 0 {
        return Err(CliError::Leak {
            live: totals.live(),
            allocs: totals.allocations,
            frees: totals.deallocations,
        });
    }
    println!(
        "backing totals: {} allocs, {} frees",
        totals.allocations, totals.deallocations
    );
    Ok(())
}
