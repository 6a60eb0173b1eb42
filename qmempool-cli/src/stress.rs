//! Multi-threaded stress driver.
//!
//! One worker per CPU shard, each holding its shard's lease for the whole
//! run. With `cross_cpu_free` every burst is handed to the next worker and
//! released into that worker's cache, so elements migrate between shards.

use std::thread;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, SendError, Sender};
use qmempool_config::{QmempoolConfig, WorkloadConfig};
use qmempool_core::alloc::AllocFlags;
use qmempool_core::{Element, LeaseError, Pool, PoolBuilder};
use qmempool_telemetry::MetricsRecorder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::backing::Backing;
use crate::error::CliError;

type Handoff = (Sender<Vec<Element>>, Receiver<Vec<Element>>);

#[derive(Debug, Default, Clone, Copy)]
struct WorkerReport {
    allocated: u64,
    freed: u64,
    failures: u64,
}

pub fn run_stress(
    config: &QmempoolConfig,
    seed: u64,
    metrics: Option<&MetricsRecorder>,
) -> Result<(), CliError> {
    let workload = &config.workload;
    let threads = workload.threads;
    let headroom = threads * workload.burst * 2;
    let backing = Backing::from_config(&config.pool, headroom)?;

    let pool = PoolBuilder::new()
        .local_capacity(config.pool.local_capacity)
        .shared_capacity(config.pool.shared_capacity)
        .preallocate(config.pool.preallocate)
        .cpus(config.pool.cpus.max(threads))
        .backing(backing.allocator())
        .build()?;

    info!(
        threads,
        iterations = workload.iterations,
        burst = workload.burst,
        cross_cpu_free = workload.cross_cpu_free,
        backing = backing.name(),
        "stress run starting"
    );

    let started = Instant::now();
    let reports = run_workers(&pool, workload, seed)?;
    let elapsed = started.elapsed();

    let total = reports
        .iter()
        .fold(WorkerReport::default(), |acc, r| WorkerReport {
            allocated: acc.allocated + r.allocated,
            freed: acc.freed + r.freed,
            failures: acc.failures + r.failures,
        });
    if total.failures > 0 {
        warn!(failures = total.failures, "allocations failed with backing exhausted");
    }

    let stats = pool.stats();
    let cpu_stats = pool.cpu_stats_all();
    if let Some(metrics) = metrics {
        metrics.record(&stats, &cpu_stats);
    }

    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{} allocations, {} frees, {} failures in {:.3}s ({:.0} ops/s)",
        total.allocated,
        total.freed,
        total.failures,
        secs,
        (total.allocated + total.freed) as f64 / secs
    );
    println!(
        "backing: {} allocs, {} frees, {} shared refills, {} drains",
        stats.backing_allocs, stats.backing_frees, stats.shared_refills, stats.backing_drains
    );
    for cpu in cpu_stats.iter().take(threads) {
        println!(
            "cpu {:>3}: refills {} full {} drains {} cached {}",
            cpu.cpu, cpu.refill_count, cpu.full_count, cpu.drain_count, cpu.local_len
        );
    }

    pool.destroy();

    let totals = backing.stats();
    if totals.live() != 0 {
        return Err(CliError::Leak {
            live: totals.live(),
            allocs: totals.allocations,
            frees: totals.deallocations,
        });
    }
    info!(
        allocs = totals.allocations,
        frees = totals.deallocations,
        "backing allocator balanced"
    );
    Ok(())
}

fn run_workers(
    pool: &Pool,
    workload: &WorkloadConfig,
    seed: u64,
) -> Result<Vec<WorkerReport>, CliError> {
    let threads = workload.threads;

    // Worker `id` receives on channel `id` and sends to channel `id + 1`.
    let mut handoffs: Vec<Option<Handoff>> = if workload.cross_cpu_free {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..threads).map(|_| channel::unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(id, rx)| Some((senders[(id + 1) % threads].clone(), rx)))
            .collect()
    } else {
        (0..threads).map(|_| None).collect()
    };

    thread::scope(|s| {
        let handles = handoffs
            .drain(..)
            .enumerate()
            .map(|(id, handoff)| {
                thread::Builder::new()
                    .name(format!("worker-{}", id))
                    .spawn_scoped(s, move || worker(pool, id, handoff, workload, seed))
            })
            .collect::<Result<Vec<_>, _>>()?;

        handles
            .into_iter()
            .enumerate()
            .map(|(id, handle)| -> Result<WorkerReport, CliError> {
                match handle.join() {
                    Ok(report) => Ok(report?),
                    Err(_) => Err(CliError::Worker(id)),
                }
            })
            .collect()
    })
}

fn worker(
    pool: &Pool,
    id: usize,
    handoff: Option<Handoff>,
    workload: &WorkloadConfig,
    seed: u64,
) -> Result<WorkerReport, LeaseError> {
    let mut lease = pool.lease(id)?;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(id as u64));
    let mut report = WorkerReport::default();

    for round in 0..workload.iterations {
        let burst = rng.random_range(1..=workload.burst);
        let mut held = Vec::with_capacity(burst);
        for _ in 0..burst {
            match lease.allocate(AllocFlags::NO_WARN) {
                Ok(elem) => {
                    // SAFETY: the element is ours and at least one byte long.
                    unsafe { elem.as_ptr().as_ptr().write(round as u8) };
                    held.push(elem);
                }
                Err(_) => {
                    report.failures += 1;
                    break;
                }
            }
        }
        report.allocated += held.len() as u64;

        let to_free = match &handoff {
            Some((tx, rx)) => match tx.send(held) {
                Ok(()) => rx.recv().unwrap_or_default(),
                Err(SendError(back)) => back,
            },
            None => held,
        };
        report.freed += to_free.len() as u64;
        for elem in to_free {
            lease.free(elem);
        }
    }

    debug!(worker = id, cpu = lease.cpu(), ?report, "worker finished");
    Ok(report)
}
