//! ## qmempool-core::alloc::backing
//! **Backing allocator contract**
//!
//! A backing allocator is the ultimate source and sink of fixed-size
//! elements. Every element produced by one allocator shares the same
//! [`Layout`]. The pool never materialises elements itself.

use std::alloc::{Layout, LayoutError};
use std::ptr::NonNull;

use thiserror::Error;

/// Errors raised while constructing a backing allocator.
#[derive(Error, Debug)]
pub enum BackingError {
    #[error("Element layout must have a non-zero size")]
    ZeroSized,
    #[error("Allocator capacity must be greater than zero")]
    ZeroCapacity,
    #[error("Invalid element layout: {0}")]
    Layout(#[from] LayoutError),
}

bitflags::bitflags! {
    /// Allocation policy bits passed through to the backing allocator.
    ///
    /// Unknown bits are retained, so allocators can define their own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocFlags: u32 {
        /// Zero-fill element memory on allocation.
        const ZERO = 1 << 0;
        /// Do not log when the backing allocator is depleted.
        const NO_WARN = 1 << 1;
    }
}

impl AllocFlags {
    pub const NONE: Self = Self::empty();
}

/// Source and sink of fixed-size elements.
///
/// Implementations must be thread-safe: the pool calls them from any CPU
/// without external locking.
pub trait BackingAllocator: Send + Sync {
    /// Layout shared by every element this allocator produces.
    fn layout(&self) -> Layout;

    /// Produces one element, or `None` when the allocator is exhausted.
    fn alloc(&self, flags: AllocFlags) -> Option<NonNull<u8>>;

    /// Reclaims one element.
    ///
    /// # Safety
    ///
    /// `elem` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator and not reclaimed since.
    unsafe fn free(&self, elem: NonNull<u8>);
}

/// Rejects zero-sized layouts, which `std::alloc` cannot serve.
pub(crate) fn check_layout(layout: Layout) -> Result<Layout, BackingError> {
    if layout.size() == 0 {
        return Err(BackingError::ZeroSized);
    }
    Ok(layout)
}
