//! SPSC atomic ring
//!
//! Bounded single-producer/single-consumer queue used for the
//! submission hand-off inside the AIO backends.
//!
//! # Indices
//!
//! `write_index` and `read_index` are monotonically increasing u64s.
//! Actual slot = index & mask. Occupancy = `write_index - read_index`;
//! empty when equal, full when occupancy == capacity. The indices never
//! decrease while the ring is alive, so both sides can observe
//! occupancy without coordination.
//!
//! # Ordering
//!
//! - Producer: loads `read_index` with Acquire before overwriting a
//!   slot, publishes `write_index` with Release after the slot write.
//! - Consumer: loads `write_index` with Acquire, publishes `read_index`
//!   with Release after copying the slot out.
//!
//! # Contract
//!
//! Exactly one producer and one consumer. Concurrent pushes from two
//! threads (or concurrent pops) are undefined; this is what lets the
//! index updates be plain stores instead of CAS.

use core::fmt;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error returned by [`SpscRing::push`] on a full ring, handing the
/// rejected item back to the producer.
pub struct RingFull<T>(pub T);

impl<T> fmt::Debug for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingFull(..)")
    }
}

impl<T> fmt::Display for RingFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring full")
    }
}

/// Index padded to its own cache line so producer and consumer do not
/// false-share.
#[repr(align(64))]
struct PaddedIndex(AtomicU64);

/// Bounded SPSC ring. Capacity must be a power of two and at least 2.
pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
    write_index: PaddedIndex,
    read_index: PaddedIndex,
}

// Safety: one thread pushes, one thread pops; slot hand-off is
// synchronized by the Release/Acquire pairs on the indices.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring with the given capacity.
    ///
    /// Fails unless `capacity` is a power of two and >= 2.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return None;
        }
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Some(Self {
            slots,
            mask: (capacity - 1) as u64,
            write_index: PaddedIndex(AtomicU64::new(0)),
            read_index: PaddedIndex(AtomicU64::new(0)),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Push an item. Producer side only.
    ///
    /// Returns the item back via [`RingFull`] when occupancy equals
    /// capacity.
    pub fn push(&self, item: T) -> Result<(), RingFull<T>> {
        let w = self.write_index.0.load(Ordering::Relaxed);
        // Acquire pairs with the consumer's Release on read_index: the
        // slot we are about to overwrite has been fully copied out.
        let r = self.read_index.0.load(Ordering::Acquire);
        if w.wrapping_sub(r) >= self.slots.len() as u64 {
            return Err(RingFull(item));
        }
        let idx = (w & self.mask) as usize;
        unsafe {
            (*self.slots[idx].get()).write(item);
        }
        // Release publishes the slot contents to the consumer.
        self.write_index.0.store(w.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop an item. Consumer side only.
    pub fn pop(&self) -> Option<T> {
        let r = self.read_index.0.load(Ordering::Relaxed);
        // Acquire pairs with the producer's Release on write_index.
        let w = self.write_index.0.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let idx = (r & self.mask) as usize;
        let item = unsafe { (*self.slots[idx].get()).assume_init_read() };
        // Release frees the slot for the producer to reuse.
        self.read_index.0.store(r.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Current occupancy. Exact from either endpoint, a snapshot from
    /// anywhere else.
    pub fn len(&self) -> usize {
        let w = self.write_index.0.load(Ordering::Acquire);
        let r = self.read_index.0.load(Ordering::Acquire);
        w.wrapping_sub(r) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Drop any items still in flight.
        while self.pop().is_some() {}
    }
}
