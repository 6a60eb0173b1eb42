//! Pool sizing and backing allocator selection.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Which backing allocator feeds the pool.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackingKind {
    /// One global-heap allocation per element.
    #[default]
    Heap,
    /// Pre-reserved chunks behind a single lock.
    Chunk,
}

/// Pool configuration parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validation::validate_pool))]
pub struct PoolConfig {
    /// Per-CPU ring size (power of two, at least one bulk transfer of 16).
    #[serde(default = "default_local_capacity")]
    #[validate(range(min = 16, max = 65536))]
    #[validate(custom(function = validation::validate_power_of_two))]
    pub local_capacity: usize,

    /// Shared ring size (power of two, above one refill of 2 x 16).
    #[serde(default = "default_shared_capacity")]
    #[validate(range(min = 64, max = 1048576))]
    #[validate(custom(function = validation::validate_power_of_two))]
    pub shared_capacity: usize,

    /// Elements pushed into the shared ring at creation.
    #[serde(default = "default_preallocate")]
    pub preallocate: usize,

    /// Number of per-CPU shards.
    #[serde(default = "default_cpus")]
    #[validate(range(min = 1, max = 4096))]
    pub cpus: usize,

    /// Element size in bytes.
    #[serde(default = "default_element_size")]
    #[validate(range(min = 1, max = 1048576))]
    pub element_size: usize,

    /// Element alignment in bytes (must be a power of two).
    #[serde(default = "default_element_align")]
    #[validate(range(min = 1, max = 4096))]
    #[validate(custom(function = validation::validate_power_of_two))]
    pub element_align: usize,

    #[serde(default)]
    pub backing: BackingKind,

    /// Ceiling on live backing elements; unbounded when absent. For the
    /// chunk allocator this is the number of reserved slots.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub backing_limit: Option<usize>,
}

fn default_local_capacity() -> usize {
    64
}

fn default_shared_capacity() -> usize {
    1024
}

fn default_preallocate() -> usize {
    256
}

fn default_cpus() -> usize {
    num_cpus::get()
}

fn default_element_size() -> usize {
    2048
}

fn default_element_align() -> usize {
    64
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            local_capacity: default_local_capacity(),
            shared_capacity: default_shared_capacity(),
            preallocate: default_preallocate(),
            cpus: default_cpus(),
            element_size: default_element_size(),
            element_align: default_element_align(),
            backing: BackingKind::default(),
            backing_limit: None,
        }
    }
}
