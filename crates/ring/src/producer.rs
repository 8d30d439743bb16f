//! Producer path: claim, wait for the slowest consumer, write, publish.

use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use crate::error::{Result, RingError};
use crate::ring::RingShared;

/// The single writer of a ring.
///
/// Not `Clone`, and [`Publisher::add`] takes `&mut self`, so two concurrent
/// adds on one ring cannot be expressed. Wrap it in a mutex to share it
/// between several producers.
pub struct Publisher<T> {
	shared: Arc<RingShared<T>>,
	/// Next sequence to claim.
	next: u64,
	/// Gating minimum seen for a membership generation. Consumer cursors only
	/// move forward, so the value stays a valid lower bound until membership
	/// changes.
	cached: Option<(u64, u64)>,
}

impl<T> std::fmt::Debug for Publisher<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Publisher").field("ring", &self.shared.name).field("next", &self.next).finish()
	}
}

impl<T> Publisher<T>
where
	T: Send + Sync + 'static,
{
	pub(crate) fn new(shared: Arc<RingShared<T>>) -> Self {
		Self {
			shared,
			next: 0,
			cached: None,
		}
	}

	/// Sequence the next added entry will receive.
	pub fn next_sequence(&self) -> u64 {
		self.next
	}

	/// Publishes one entry, waiting while the slowest consumer still needs the
	/// slot it would overwrite.
	///
	/// # Errors
	///
	/// Returns [`RingError::Shutdown`] once the ring is shut down; the entry is
	/// not published.
	pub async fn add(&mut self, entry: T) -> Result<()> {
		let sequence = self.next;
		self.wait_for_capacity(sequence).await?;
		// SAFETY: `&mut self` makes this the only writer, and the capacity wait
		// proved every live consumer has moved past `sequence - capacity`.
		unsafe { self.shared.slots.write(sequence, entry) };
		self.publish(sequence + 1);
		Ok(())
	}

	/// Publishes every entry in order. Backpressure is checked once per run of
	/// writable slots rather than once per entry, and each run is published
	/// with a single write-sequence store.
	///
	/// # Errors
	///
	/// Returns [`RingError::Shutdown`] once the ring is shut down. Entries
	/// already published by this call stay published.
	pub async fn add_all<I>(&mut self, entries: I) -> Result<()>
	where
		I: IntoIterator<Item = T>,
	{
		let capacity = self.shared.slots.capacity();
		let mut entries = entries.into_iter().peekable();
		while entries.peek().is_some() {
			let first = self.next;
			let limit = self.wait_for_capacity(first).await?.min(first + capacity);

			let mut sequence = first;
			while sequence < limit {
				let Some(entry) = entries.next() else {
					break;
				};
				// SAFETY: single writer; every sequence below `limit` is writable.
				unsafe { self.shared.slots.write(sequence, entry) };
				sequence += 1;
			}
			self.publish(sequence);
		}
		Ok(())
	}

	/// Thread-blocking [`Self::add`] for producers outside async code.
	///
	/// Must not be called from within an async task.
	pub fn blocking_add(&mut self, entry: T) -> Result<()> {
		futures::executor::block_on(self.add(entry))
	}

	fn publish(&mut self, next: u64) {
		self.next = next;
		self.shared.write.publish(next);
		self.shared.data.wake();
		self.shared.release_consumed();
	}

	/// Waits until `sequence` may be written, that is until every gating
	/// consumer's next sequence is above `sequence - capacity`.
	///
	/// Returns the exclusive upper bound of sequences currently writable.
	async fn wait_for_capacity(&mut self, sequence: u64) -> Result<u64> {
		let shared = Arc::clone(&self.shared);
		if shared.is_shut() {
			return Err(RingError::Shutdown);
		}
		if let Some(limit) = self.writable_limit(sequence) {
			return Ok(limit);
		}

		tracing::trace!(ring = %shared.name, sequence, "ring.producer.backpressure");
		let ready = || {
			if shared.is_shut() {
				return Some(Err(RingError::Shutdown));
			}
			self.writable_limit(sequence).map(Ok)
		};
		tokio::select! {
			biased;
			_ = shared.shutdown.cancelled() => Err(RingError::Shutdown),
			res = shared.space.wait_until(shared.wait, ready) => res,
		}
	}

	/// Returns the writable bound if `sequence` is writable now. Consults the
	/// cached minimum first and rescans the gating set only when the cache
	/// cannot prove it.
	fn writable_limit(&mut self, sequence: u64) -> Option<u64> {
		let capacity = self.shared.slots.capacity();
		// Orders the previous publish before the gating snapshot load; pairs
		// with the fence in `Registry::register`.
		fence(Ordering::SeqCst);
		let gating = self.shared.registry.gating();
		if let Some((generation, min)) = self.cached
			&& generation == gating.generation
			&& min + capacity > sequence
		{
			return Some(min + capacity);
		}
		match gating.min_next() {
			None => {
				self.cached = None;
				Some(u64::MAX)
			}
			Some(min) => {
				self.cached = Some((gating.generation, min));
				(min + capacity > sequence).then_some(min + capacity)
			}
		}
	}
}
