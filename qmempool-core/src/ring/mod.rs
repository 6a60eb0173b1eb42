//! Lock-free bounded ring of `Copy` handles.
//!
//! The ring uses a pair of head/tail counters per side, in the style of the
//! DPDK `rte_ring`:
//! - Producers move `prod.head` forward to reserve slots, write them, then
//!   publish by moving `prod.tail`.
//! - Consumers do the same with `cons.head` / `cons.tail`.
//!
//! Multi-producer (multi-consumer) paths reserve with a CAS on the head and
//! publish in reservation order. Single-producer (single-consumer) paths
//! skip the CAS and are `unsafe`: the caller guarantees there is no other
//! producer (consumer) at the same time.
//!
//! Bulk operations are all-or-nothing. One slot is always left unused, so a
//! ring created with capacity `n` holds at most `n - 1` handles.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::Backoff;
use thiserror::Error;

/// Ring error conditions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring is full")]
    Full,
    #[error("Ring is empty")]
    Empty,
    #[error("Invalid ring capacity {0} (must be a power of two >= 2)")]
    InvalidCapacity(usize),
}

/// Creation flags, recorded for diagnostics and checked in debug builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingFlags {
    pub single_producer: bool,
    pub single_consumer: bool,
}

impl RingFlags {
    /// Multi-producer, multi-consumer.
    pub const MPMC: Self = Self {
        single_producer: false,
        single_consumer: false,
    };

    /// Single-producer, single-consumer.
    pub const SPSC: Self = Self {
        single_producer: true,
        single_consumer: true,
    };
}

/// Cache-line aligned atomic counter to prevent false sharing
#[repr(align(64))]
struct AlignedCounter(AtomicUsize);

impl AlignedCounter {
    #[inline]
    fn new(value: usize) -> Self {
        Self(AtomicUsize::new(value))
    }
}

struct HeadTail {
    head: AlignedCounter,
    tail: AlignedCounter,
}

impl HeadTail {
    fn new() -> Self {
        Self {
            head: AlignedCounter::new(0),
            tail: AlignedCounter::new(0),
        }
    }
}

/// Bounded lock-free FIFO of `T` handles.
pub struct Ring<T: Copy> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    capacity: usize,
    flags: RingFlags,
    prod: HeadTail,
    cons: HeadTail,
}

// SAFETY: slots are only written between a successful producer reservation
// and its tail publication, and only read between a consumer reservation and
// its tail publication. Those windows never overlap for the same slot.
unsafe impl<T: Copy + Send> Send for Ring<T> {}
unsafe impl<T: Copy + Send> Sync for Ring<T> {}

impl<T: Copy> Ring<T> {
    /// Creates a ring with `size` slots (`size - 1` usable).
    ///
    /// # Arguments
    ///
    /// * `size` - Must be a power of two for efficient masking.
    pub fn new(size: usize, flags: RingFlags) -> Result<Self, RingError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(RingError::InvalidCapacity(size));
        }

        let slots = (0..size)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            mask: size - 1,
            capacity: size - 1,
            flags,
            prod: HeadTail::new(),
            cons: HeadTail::new(),
        })
    }

    /// Maximum number of handles the ring can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn flags(&self) -> RingFlags {
        self.flags
    }

    /// Number of published entries. Racy under concurrent use.
    #[inline]
    pub fn len(&self) -> usize {
        let cons_tail = self.cons.tail.0.load(Ordering::Acquire);
        let prod_tail = self.prod.tail.0.load(Ordering::Acquire);
        prod_tail.wrapping_sub(cons_tail).min(self.capacity)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Free slots. Racy under concurrent use.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.capacity - self.len()
    }

    /// Multi-producer single-element enqueue.
    #[inline]
    pub fn mp_enqueue(&self, item: T) -> Result<(), RingError> {
        self.mp_enqueue_bulk(std::slice::from_ref(&item))
    }

    /// Multi-producer all-or-nothing enqueue of `items`.
    #[inline]
    pub fn mp_enqueue_bulk(&self, items: &[T]) -> Result<(), RingError> {
        // SAFETY: the multi-producer path tolerates concurrent producers.
        unsafe { self.enqueue_inner(items, false) }
    }

    /// Single-producer single-element enqueue.
    ///
    /// # Safety
    ///
    /// No other thread may enqueue into this ring for the duration of the call.
    #[inline]
    pub unsafe fn sp_enqueue(&self, item: T) -> Result<(), RingError> {
        self.sp_enqueue_bulk(std::slice::from_ref(&item))
    }

    /// Single-producer all-or-nothing enqueue of `items`.
    ///
    /// # Safety
    ///
    /// No other thread may enqueue into this ring for the duration of the call.
    #[inline]
    pub unsafe fn sp_enqueue_bulk(&self, items: &[T]) -> Result<(), RingError> {
        debug_assert!(self.flags.single_producer, "sp enqueue on a multi-producer ring");
        self.enqueue_inner(items, true)
    }

    /// Multi-consumer single-element dequeue.
    #[inline]
    pub fn mc_dequeue(&self) -> Option<T> {
        let mut out = [MaybeUninit::uninit()];
        // SAFETY: the multi-consumer path tolerates concurrent consumers.
        unsafe { self.dequeue_inner(&mut out, false).ok()? };
        // SAFETY: a successful dequeue initialised every element of `out`.
        Some(unsafe { out[0].assume_init() })
    }

    /// Multi-consumer all-or-nothing dequeue filling `out`.
    #[inline]
    pub fn mc_dequeue_bulk(&self, out: &mut [T]) -> Result<(), RingError> {
        // SAFETY: multi-consumer path; `T: Copy` makes the cast to
        // `MaybeUninit<T>` a plain overwrite.
        unsafe { self.dequeue_inner(as_uninit_mut(out), false) }
    }

    /// Single-consumer single-element dequeue.
    ///
    /// # Safety
    ///
    /// No other thread may dequeue from this ring for the duration of the call.
    #[inline]
    pub unsafe fn sc_dequeue(&self) -> Option<T> {
        debug_assert!(self.flags.single_consumer, "sc dequeue on a multi-consumer ring");
        let mut out = [MaybeUninit::uninit()];
        self.dequeue_inner(&mut out, true).ok()?;
        Some(out[0].assume_init())
    }

    /// Single-consumer all-or-nothing dequeue filling `out`.
    ///
    /// # Safety
    ///
    /// No other thread may dequeue from this ring for the duration of the call.
    #[inline]
    pub unsafe fn sc_dequeue_bulk(&self, out: &mut [T]) -> Result<(), RingError> {
        debug_assert!(self.flags.single_consumer, "sc dequeue on a multi-consumer ring");
        self.dequeue_inner(as_uninit_mut(out), true)
    }

    unsafe fn enqueue_inner(&self, items: &[T], single: bool) -> Result<(), RingError> {
        let n = items.len();
        if n == 0 {
            return Ok(());
        }

        let mut head = self.prod.head.0.load(Ordering::Acquire);
        loop {
            let cons_tail = self.cons.tail.0.load(Ordering::Acquire);
            let free = self.capacity.wrapping_add(cons_tail).wrapping_sub(head);
            if n > free {
                return Err(RingError::Full);
            }
            let next = head.wrapping_add(n);
            if single {
                self.prod.head.0.store(next, Ordering::Relaxed);
                break;
            }
            match self.prod.head.0.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        for (i, item) in items.iter().enumerate() {
            let idx = head.wrapping_add(i) & self.mask;
            // SAFETY: slots [head, head + n) are reserved for this producer.
            (*self.slots[idx].get()).write(*item);
        }

        self.publish(&self.prod, head, head.wrapping_add(n), single);
        Ok(())
    }

    unsafe fn dequeue_inner(&self, out: &mut [MaybeUninit<T>], single: bool) -> Result<(), RingError> {
        let n = out.len();
        if n == 0 {
            return Ok(());
        }

        let mut head = self.cons.head.0.load(Ordering::Acquire);
        loop {
            let prod_tail = self.prod.tail.0.load(Ordering::Acquire);
            let entries = prod_tail.wrapping_sub(head);
            if n > entries {
                return Err(RingError::Empty);
            }
            let next = head.wrapping_add(n);
            if single {
                self.cons.head.0.store(next, Ordering::Relaxed);
                break;
            }
            match self.cons.head.0.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        for (i, slot) in out.iter_mut().enumerate() {
            let idx = head.wrapping_add(i) & self.mask;
            // SAFETY: slots [head, head + n) were published by producers and
            // are reserved for this consumer.
            slot.write((*self.slots[idx].get()).assume_init());
        }

        self.publish(&self.cons, head, head.wrapping_add(n), single);
        Ok(())
    }

    /// Moves `side.tail` from `old` to `new` once all earlier reservations
    /// on the same side have published.
    #[inline]
    fn publish(&self, side: &HeadTail, old: usize, new: usize, single: bool) {
        if !single {
            let backoff = Backoff::new();
            while side.tail.0.load(Ordering::Acquire) != old {
                backoff.snooze();
            }
        }
        side.tail.0.store(new, Ordering::Release);
    }
}

impl<T: Copy> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("flags", &self.flags)
            .finish()
    }
}

#[inline]
fn as_uninit_mut<T: Copy>(out: &mut [T]) -> &mut [MaybeUninit<T>] {
    // SAFETY: `MaybeUninit<T>` has the same layout as `T`, and only
    // initialised values are ever written through the returned slice.
    unsafe { &mut *(out as *mut [T] as *mut [MaybeUninit<T>]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            Ring::<u64>::new(3, RingFlags::MPMC),
            Err(RingError::InvalidCapacity(3))
        ));
        assert!(matches!(
            Ring::<u64>::new(1, RingFlags::MPMC),
            Err(RingError::InvalidCapacity(1))
        ));
    }

    #[test]
    fn holds_one_less_than_size() {
        let ring = Ring::<u64>::new(4, RingFlags::MPMC).unwrap();
        assert_eq!(ring.capacity(), 3);
        for i in 0..3 {
            ring.mp_enqueue(i).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.mp_enqueue(9), Err(RingError::Full));
    }

    #[test]
    fn maintains_fifo_order() {
        let ring = Ring::<u64>::new(8, RingFlags::SPSC).unwrap();
        unsafe {
            ring.sp_enqueue(1).unwrap();
            ring.sp_enqueue(2).unwrap();
            assert_eq!(ring.sc_dequeue(), Some(1));
            assert_eq!(ring.sc_dequeue(), Some(2));
            assert_eq!(ring.sc_dequeue(), None);
        }
    }

    #[test]
    fn bulk_is_all_or_nothing() {
        let ring = Ring::<u64>::new(8, RingFlags::MPMC).unwrap();
        ring.mp_enqueue_bulk(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(ring.mp_enqueue_bulk(&[6, 7, 8]), Err(RingError::Full));
        assert_eq!(ring.len(), 5);

        let mut out = [0u64; 6];
        assert_eq!(ring.mc_dequeue_bulk(&mut out), Err(RingError::Empty));
        assert_eq!(ring.len(), 5);

        let mut out = [0u64; 5];
        ring.mc_dequeue_bulk(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn buffer_wraps_correctly() {
        let ring = Ring::<u64>::new(4, RingFlags::SPSC).unwrap();
        for cycle in 0..5u64 {
            let batch = [cycle * 3, cycle * 3 + 1, cycle * 3 + 2];
            unsafe { ring.sp_enqueue_bulk(&batch).unwrap() };
            let mut out = [0u64; 3];
            unsafe { ring.sc_dequeue_bulk(&mut out).unwrap() };
            assert_eq!(out, batch);
        }
    }

    #[test]
    fn concurrent_bulk_transfers_lose_nothing() {
        const PRODUCERS: u64 = 4;
        const BATCHES: u64 = 500;
        const BATCH: usize = 8;

        let ring = Arc::new(Ring::<u64>::new(256, RingFlags::MPMC).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let ring = Arc::clone(&ring);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    let mut out = [0u64; BATCH];
                    loop {
                        if ring.mc_dequeue_bulk(&mut out).is_ok() {
                            seen.extend_from_slice(&out);
                        } else if done.load(Ordering::Acquire) && ring.is_empty() {
                            break;
                        } else {
                            std::thread::yield_now();
                        }
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || {
                    for b in 0..BATCHES {
                        let base = (p * BATCHES + b) * BATCH as u64;
                        let batch: Vec<u64> = (base..base + BATCH as u64).collect();
                        while ring.mp_enqueue_bulk(&batch).is_err() {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        done.store(true, Ordering::Release);

        let mut all: Vec<u64> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<u64> = (0..PRODUCERS * BATCHES * BATCH as u64).collect();
        assert_eq!(all, expected);
    }
}
