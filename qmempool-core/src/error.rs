use thiserror::Error;

use crate::pool::{BULK, REFILL_MULTIPLIER};
use crate::ring::RingError;

/// Pool creation failures.
///
/// Configuration variants are detected before any backing allocator call.
/// The remaining variants occur during construction, after which every
/// element already produced has been returned to the backing allocator.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("Local queue size ({local}) too small for bulk transfer of {bulk}", bulk = BULK)]
    LocalTooSmall { local: usize },

    #[error(
        "Shared queue size ({shared}) too small for bulk refill (must exceed {min})",
        min = BULK * REFILL_MULTIPLIER
    )]
    SharedTooSmall { shared: usize },

    #[error("Queue sizes ({local}/{shared}) must be power of two")]
    NotPowerOfTwo { local: usize, shared: usize },

    #[error("Preallocation ({prealloc}) must be below shared queue size ({shared})")]
    PreallocTooLarge { prealloc: usize, shared: usize },

    #[error("Missing backing allocator")]
    MissingBacking,

    #[error("At least one CPU shard is required")]
    NoCpus,

    #[error("Backing allocator exhausted during preallocation ({allocated}/{requested})")]
    PreallocExhausted { allocated: usize, requested: usize },

    #[error("Ring creation failed: {0}")]
    Ring(#[from] RingError),
}

impl CreateError {
    /// True for errors caused by the requested parameters rather than by
    /// the backing allocator.
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::PreallocExhausted { .. } | Self::Ring(_))
    }
}

/// Failure to reserve a CPU shard.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LeaseError {
    #[error("CPU {cpu} out of range (pool has {cpus} CPUs)")]
    InvalidCpu { cpu: usize, cpus: usize },

    #[error("CPU {0} is already leased")]
    Busy(usize),
}

/// The backing allocator could not produce an element.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Out of memory: backing allocator exhausted")]
pub struct OutOfMemory;
