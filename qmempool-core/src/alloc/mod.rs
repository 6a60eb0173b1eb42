//! ## qmempool-core::alloc
//! **Backing allocators that feed the pool**
//!
//! ### Key Submodules:
//! - `backing/`: the `BackingAllocator` contract and `AllocFlags`
//! - `heap/`: one global-heap allocation per element, optionally bounded
//! - `chunk/`: pre-reserved chunks behind a single free-list lock
//! - `stats/`: allocation call accounting

pub mod backing;
pub mod chunk;
pub mod heap;
pub mod stats;

pub use backing::{AllocFlags, BackingAllocator, BackingError};
pub use chunk::ChunkAllocator;
pub use heap::HeapAllocator;
pub use stats::{AllocStats, AllocStatsSnapshot};
