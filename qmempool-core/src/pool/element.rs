//! Element handles.

use std::fmt;
use std::ptr::NonNull;

/// Untagged element pointer as stored in the rings.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawElem(pub(crate) NonNull<u8>);

// SAFETY: a `RawElem` resident in a ring is owned by the pool, not by any
// thread.
unsafe impl Send for RawElem {}

impl RawElem {
    /// Scratch filler for bulk-transfer arrays; never handed out.
    pub(crate) const DANGLING: Self = Self(NonNull::dangling());
}

/// Owning handle to one pool element.
///
/// Not `Clone`: handing the element back with
/// [`CpuLease::free`](super::CpuLease::free) consumes it, so the same
/// element cannot be released twice.
#[must_use = "dropping an Element leaks it; release it with CpuLease::free"]
pub struct Element {
    ptr: NonNull<u8>,
    pool_id: u64,
}

// SAFETY: an `Element` is the unique owner of its memory, like `Box<[u8]>`.
unsafe impl Send for Element {}
unsafe impl Sync for Element {}

impl Element {
    #[inline]
    pub(crate) fn new(raw: RawElem, pool_id: u64) -> Self {
        Self {
            ptr: raw.0,
            pool_id,
        }
    }

    #[inline]
    pub(crate) fn into_raw(self) -> (RawElem, u64) {
        (RawElem(self.ptr), self.pool_id)
    }

    /// Start of the element's memory. Valid for the pool's element layout.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Address of the element, useful as an identity.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Id of the pool this element belongs to.
    #[inline]
    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("ptr", &self.ptr)
            .field("pool_id", &self.pool_id)
            .finish()
    }
}
