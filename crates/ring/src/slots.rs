//! Fixed-size slot storage shared by the producer and every consumer task.
//!
//! The store itself performs no synchronization beyond each slot's
//! publication tag. Exclusive write access and read-after-publish ordering
//! come from the producer's gating check and the write sequence. The tag also
//! serves as a short per-slot lock between the producer and a task releasing
//! a consumed entry.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::Backoff;

use crate::error::{Result, RingError};

/// Tag of a slot that holds no entry.
const EMPTY: u64 = u64::MAX;
/// Tag of a slot whose value is being replaced or released.
const BUSY: u64 = u64::MAX - 1;

struct Slot<T> {
	/// Sequence currently stored in `value`.
	tag: AtomicU64,
	value: UnsafeCell<Option<T>>,
}

/// Power-of-two array of slots indexed by `sequence & mask`.
pub(crate) struct SlotStore<T> {
	slots: Box<[Slot<T>]>,
	mask: u64,
}

// SAFETY: slots are written only by the single publisher, and only once the
// gating check proves no live consumer can still read the overwritten
// sequence. Readers touch a slot only after observing its publication through
// the acquire load of the write sequence, and read it through `&T`.
unsafe impl<T: Send + Sync> Send for SlotStore<T> {}
unsafe impl<T: Send + Sync> Sync for SlotStore<T> {}

impl<T> SlotStore<T> {
	pub(crate) fn new(capacity: usize) -> Result<Self> {
		if capacity == 0 || !capacity.is_power_of_two() {
			return Err(RingError::InvalidCapacity(capacity));
		}
		let slots = (0..capacity)
			.map(|_| Slot {
				tag: AtomicU64::new(EMPTY),
				value: UnsafeCell::new(None),
			})
			.collect::<Vec<_>>()
			.into_boxed_slice();
		Ok(Self {
			slots,
			mask: capacity as u64 - 1,
		})
	}

	#[inline]
	pub(crate) fn capacity(&self) -> u64 {
		self.slots.len() as u64
	}

	#[inline]
	fn slot(&self, sequence: u64) -> &Slot<T> {
		// The mask keeps the index below `slots.len()`.
		&self.slots[(sequence & self.mask) as usize]
	}

	/// Stores `entry` for `sequence` and publishes its tag with release ordering.
	///
	/// # Safety
	///
	/// The caller must be the only writer, and no reader may still hold a
	/// reference to the sequence previously stored in this slot.
	pub(crate) unsafe fn write(&self, sequence: u64, entry: T) {
		let slot = self.slot(sequence);
		let backoff = Backoff::new();
		loop {
			let current = slot.tag.load(Ordering::Relaxed);
			if current != BUSY
				&& slot
					.tag
					.compare_exchange_weak(current, BUSY, Ordering::Acquire, Ordering::Relaxed)
					.is_ok()
			{
				break;
			}
			backoff.snooze();
		}
		// SAFETY: the caller is the only writer and the BUSY tag excludes
		// a concurrent release.
		let previous = unsafe { (*slot.value.get()).replace(entry) };
		slot.tag.store(sequence, Ordering::Release);
		drop(previous);
	}

	/// Drops the entry stored for `sequence`. Returns `false` when the slot
	/// no longer holds that sequence.
	///
	/// # Safety
	///
	/// No consumer may read `sequence` again: every live consumer's next
	/// sequence must be above it.
	pub(crate) unsafe fn release(&self, sequence: u64) -> bool {
		let slot = self.slot(sequence);
		if slot
			.tag
			.compare_exchange(sequence, BUSY, Ordering::Acquire, Ordering::Relaxed)
			.is_err()
		{
			return false;
		}
		// SAFETY: the BUSY tag excludes the producer, and the caller excludes
		// readers.
		let taken = unsafe { (*slot.value.get()).take() };
		slot.tag.store(EMPTY, Ordering::Release);
		drop(taken);
		true
	}

	/// Returns the entry for `sequence`, or `None` when the slot holds a
	/// different sequence.
	///
	/// # Safety
	///
	/// `sequence` must already be published, and the producer must not be
	/// able to overwrite it while the returned reference lives (the reading
	/// consumer's cursor must not have passed it).
	pub(crate) unsafe fn read(&self, sequence: u64) -> Option<&T> {
		let slot = self.slot(sequence);
		if slot.tag.load(Ordering::Acquire) != sequence {
			return None;
		}
		// SAFETY: the tag matched and the caller pins the slot against reuse.
		unsafe { (*slot.value.get()).as_ref() }
	}
}
