use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Cache-line padded sequence counter shared between the producer and consumer tasks.
///
/// Holds "next sequence" values: the write sequence (next to publish) or a
/// consumer's next sequence to consume. Stores use `SeqCst` so that they pair
/// with the parking flags in [`crate::wait`]: a writer that stores a sequence
/// and then checks for parked peers cannot miss a peer that parked after
/// checking the old value.
#[derive(Debug, Default)]
pub(crate) struct Sequence {
	value: CachePadded<AtomicU64>,
}

impl Sequence {
	pub(crate) fn new(value: u64) -> Self {
		Self {
			value: CachePadded::new(AtomicU64::new(value)),
		}
	}

	/// Loads with acquire ordering, making slot writes published before the
	/// matching [`Self::publish`] visible.
	#[inline]
	pub(crate) fn get(&self) -> u64 {
		self.value.load(Ordering::Acquire)
	}

	#[inline]
	pub(crate) fn get_seq_cst(&self) -> u64 {
		self.value.load(Ordering::SeqCst)
	}

	#[inline]
	pub(crate) fn publish(&self, value: u64) {
		self.value.store(value, Ordering::SeqCst);
	}
}
