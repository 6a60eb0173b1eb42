//! # qmempool-core
//!
//! Quick queue based memory pool: a per-CPU element cache in front of a
//! shared lock-free queue, in front of a backing allocator.
//!
//! ### Expectations (Production):
//! - No lock and no heap allocation on the allocate/free fast path
//! - One contended atomic per `BULK` elements on the refill path
//! - Invariant violations abort loudly instead of corrupting the pool
//!
//! ### Key Submodules:
//! - `ring`: bounded lock-free ring with SPSC and MPMC bulk operations
//! - `alloc`: backing allocator contract plus heap and chunk allocators
//! - `pool`: pool controller, per-CPU leases, element handles, counters

pub mod alloc;
pub mod error;
pub mod pool;
pub mod ring;

pub mod prelude {
    pub use crate::alloc::*;
    pub use crate::error::*;
    pub use crate::pool::*;
    pub use crate::ring::{Ring, RingError, RingFlags};
}

pub use error::{CreateError, LeaseError, OutOfMemory};
pub use pool::{CpuLease, Element, Pool, PoolBuilder, BULK, REFILL_MULTIPLIER};
