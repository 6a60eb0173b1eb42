//! Prometheus export of pool counters.
//!
//! The pool keeps its own relaxed counters; this module only mirrors a
//! snapshot of them into gauges at the moment [`MetricsRecorder::record`]
//! is called.

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use qmempool_core::pool::{CpuStatsSnapshot, PoolStatsSnapshot};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub backing_allocs: IntGauge,
    pub backing_frees: IntGauge,
    pub outstanding: IntGauge,
    pub shared_refills: IntGauge,
    pub backing_drains: IntGauge,
    pub shared_len: IntGauge,
    pub local_refills: IntGaugeVec,
    pub local_full: IntGaugeVec,
    pub local_drains: IntGaugeVec,
    pub local_len: IntGaugeVec,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let per_cpu = |name: &str, help: &str| -> Result<IntGaugeVec, prometheus::Error> {
            let g = IntGaugeVec::new(Opts::new(name, help), &["cpu"])?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let backing_allocs = gauge(
            "qmempool_backing_allocs",
            "Elements obtained from the backing allocator",
        )?;
        let backing_frees = gauge(
            "qmempool_backing_frees",
            "Elements returned to the backing allocator",
        )?;
        let outstanding = gauge(
            "qmempool_outstanding_elements",
            "Backing elements currently cached or held by callers",
        )?;
        let shared_refills = gauge(
            "qmempool_shared_refills",
            "Shared queue refills from the backing allocator",
        )?;
        let backing_drains = gauge(
            "qmempool_backing_drains",
            "Overflow drains to the backing allocator, sum of qmempool_local_drains",
        )?;
        let shared_len = gauge("qmempool_shared_len", "Elements in the shared queue")?;
        let local_refills = per_cpu(
            "qmempool_local_refills",
            "Local queue refills from the shared queue",
        )?;
        let local_full = per_cpu(
            "qmempool_local_full",
            "Frees that found the local queue full",
        )?;
        let local_drains = per_cpu(
            "qmempool_local_drains",
            "Overflow drains to the backing allocator, by cpu",
        )?;
        let local_len = per_cpu("qmempool_local_len", "Elements in the local queue")?;

        Ok(Self {
            registry,
            backing_allocs,
            backing_frees,
            outstanding,
            shared_refills,
            backing_drains,
            shared_len,
            local_refills,
            local_full,
            local_drains,
            local_len,
        })
    }

    /// Mirrors one set of snapshots into the gauges.
    pub fn record(&self, pool: &PoolStatsSnapshot, cpus: &[CpuStatsSnapshot]) {
        self.backing_allocs.set(clamp(pool.backing_allocs));
        self.backing_frees.set(clamp(pool.backing_frees));
        self.outstanding.set(clamp(pool.outstanding()));
        self.shared_refills.set(clamp(pool.shared_refills));
        self.backing_drains.set(clamp(pool.backing_drains));
        self.shared_len.set(clamp(pool.shared_len as u64));

        for cpu in cpus {
            let label = cpu.cpu.to_string();
            let labels = [label.as_str()];
            self.local_refills
                .with_label_values(&labels)
                .set(clamp(cpu.refill_count));
            self.local_full
                .with_label_values(&labels)
                .set(clamp(cpu.full_count));
            self.local_drains
                .with_label_values(&labels)
                .set(clamp(cpu.drain_count));
            self.local_len
                .with_label_values(&labels)
                .set(clamp(cpu.local_len as u64));
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pool_and_cpu_gauges() {
        let recorder = MetricsRecorder::new().unwrap();
        let pool = PoolStatsSnapshot {
            backing_allocs: 65,
            backing_frees: 48,
            shared_refills: 1,
            backing_drains: 1,
            shared_len: 16,
            preallocated: 32,
        };
        let cpus = [
            CpuStatsSnapshot {
                cpu: 0,
                owner_cpu: Some(0),
                refill_count: 3,
                full_count: 3,
                drain_count: 1,
                local_len: 1,
            },
            CpuStatsSnapshot {
                cpu: 1,
                ..CpuStatsSnapshot::default()
            },
        ];
        recorder.record(&pool, &cpus);

        let text = recorder.gather_metrics().unwrap();
        assert!(text.contains("qmempool_backing_allocs 65"));
        assert!(text.contains("qmempool_outstanding_elements 17"));
        assert!(text.contains("qmempool_local_full{cpu=\"0\"} 3"));
        assert!(text.contains("qmempool_local_drains{cpu=\"1\"} 0"));
    }

    #[test]
    fn record_overwrites_previous_values() {
        let recorder = MetricsRecorder::new().unwrap();
        let mut pool = PoolStatsSnapshot {
            shared_len: 10,
            ..PoolStatsSnapshot::default()
        };
        recorder.record(&pool, &[]);
        pool.shared_len = 4;
        recorder.record(&pool, &[]);
        assert_eq!(recorder.shared_len.get(), 4);
    }
}
