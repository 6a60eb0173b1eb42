//! Synthetic workload parameters for the CLI drivers.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validation::validate_workload))]
pub struct WorkloadConfig {
    /// Worker threads, one CPU shard each.
    #[serde(default = "default_threads")]
    #[validate(range(min = 1, max = 4096))]
    pub threads: usize,

    /// Allocate/free rounds per worker.
    #[serde(default = "default_iterations")]
    #[validate(range(min = 1))]
    pub iterations: usize,

    /// Elements allocated per round before they are freed.
    #[serde(default = "default_burst")]
    #[validate(range(min = 1, max = 65536))]
    pub burst: usize,

    /// Hand each burst to the next worker to free.
    #[serde(default)]
    pub cross_cpu_free: bool,
}

fn default_threads() -> usize {
    num_cpus::get().min(8)
}

fn default_iterations() -> usize {
    10_000
}

fn default_burst() -> usize {
    32
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            iterations: default_iterations(),
            burst: default_burst(),
            cross_cpu_free: false,
        }
    }
}
