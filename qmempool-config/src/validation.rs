// qmempool-config/src/validation.rs
//! Custom validation functions for configuration.

use validator::ValidationError;

use crate::{PoolConfig, WorkloadConfig};

/// Validate that the provided value is a power of two.
pub fn validate_power_of_two(value: usize) -> Result<(), ValidationError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_power_of_two"))
    }
}

/// Preallocated elements must fit in the shared queue, which keeps one
/// slot free.
pub fn validate_pool(pool: &PoolConfig) -> Result<(), ValidationError> {
    if pool.preallocate >= pool.shared_capacity {
        let mut err = ValidationError::new("preallocate_exceeds_shared");
        err.message = Some(
            format!(
                "preallocate ({}) must be below shared_capacity ({})",
                pool.preallocate, pool.shared_capacity
            )
            .into(),
        );
        return Err(err);
    }
    if pool.element_align > pool.element_size {
        return Err(ValidationError::new("align_exceeds_size"));
    }
    Ok(())
}

/// A burst must be freeable by the same worker that allocated it.
pub fn validate_workload(workload: &WorkloadConfig) -> Result<(), ValidationError> {
    if workload.cross_cpu_free && workload.threads < 2 {
        return Err(ValidationError::new("cross_cpu_free_needs_two_threads"));
    }
    Ok(())
}
