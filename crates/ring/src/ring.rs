use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering, fence};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::{RingBuilder, RingConfig};
use crate::consumer::{Consumer, ConsumerHandle, Member};
use crate::error::{Result, RingError};
use crate::join_ctrl::JoinCtrl;
use crate::producer::Publisher;
use crate::registry::Registry;
use crate::sequence::Sequence;
use crate::slots::SlotStore;
use crate::wait::{Signal, WaitStrategy};

/// Source of process-unique ring ids, used to reject foreign handles.
static RING_IDS: AtomicU64 = AtomicU64::new(0);

/// State shared by the ring handle, the publisher, and every consumer task.
pub(crate) struct RingShared<T> {
	pub(crate) id: u64,
	pub(crate) name: String,
	pub(crate) slots: SlotStore<T>,
	/// Next sequence to publish; every sequence below it is readable.
	pub(crate) write: Sequence,
	pub(crate) registry: Registry,
	pub(crate) wait: WaitStrategy,
	/// Consumers waiting for new entries.
	pub(crate) data: Signal,
	/// The producer waiting for the slowest consumer.
	pub(crate) space: Signal,
	shut: AtomicBool,
	pub(crate) shutdown: CancellationToken,
	release_consumed: bool,
	/// Every sequence below this has been released.
	released: AtomicU64,
}

impl<T> RingShared<T> {
	#[inline]
	pub(crate) fn is_shut(&self) -> bool {
		self.shut.load(Ordering::Acquire)
	}

	/// Drops the entries every gating consumer has moved past, when the ring
	/// was built with `release_consumed`. Any task may call it; each sequence
	/// is released at most once.
	pub(crate) fn release_consumed(&self) {
		if !self.release_consumed {
			return;
		}
		// Write sequence first, then the gating set: a consumer joining
		// concurrently either shows up in the snapshot or joins at or above
		// `published`.
		let published = self.write.get_seq_cst();
		fence(Ordering::SeqCst);
		let bound = self.registry.gating().min_next().map_or(published, |min| min.min(published));

		let mut from = self.released.load(Ordering::Acquire);
		loop {
			if from >= bound {
				return;
			}
			match self.released.compare_exchange_weak(from, bound, Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => break,
				Err(actual) => from = actual,
			}
		}

		// Older sequences have already been overwritten.
		let start = from.max(bound.saturating_sub(self.slots.capacity()));
		for sequence in start..bound {
			// SAFETY: `sequence < bound`, and no live or future consumer reads
			// below `bound`.
			unsafe { self.slots.release(sequence) };
		}
	}
}

/// How [`RingBuffer::shutdown`] waits for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
	/// Wait until every consumer has drained and closed.
	Blocking,
	/// Request closing and return at once; poll [`ConsumerHandle::is_closed`].
	NonBlocking,
	/// Wait at most the given duration.
	Timeout(Duration),
}

/// Outcome of one [`RingBuffer::shutdown`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
	closed: usize,
	pending: usize,
	timed_out: bool,
}

impl ShutdownReport {
	/// Consumers known to be closed when the call returned.
	pub fn closed(&self) -> usize {
		self.closed
	}

	/// Consumers still draining when the call returned.
	pub fn pending(&self) -> usize {
		self.pending
	}

	/// Whether a [`ShutdownMode::Timeout`] deadline passed before every
	/// consumer closed.
	pub fn timed_out(&self) -> bool {
		self.timed_out
	}

	/// `true` when no consumer was still draining.
	pub fn completed(&self) -> bool {
		self.pending == 0
	}
}

/// Fixed-capacity ring fanning every published entry out, in order, to each
/// registered consumer.
///
/// Entries come from the paired [`Publisher`]. Each consumer runs on its own
/// task, starts with the first entry published after it joined, and sees
/// every later entry exactly once. The producer never overwrites a slot the
/// slowest live consumer has not read yet.
///
/// Dropping the ring requests a non-blocking shutdown.
pub struct RingBuffer<T> {
	shared: Arc<RingShared<T>>,
	runtime: Handle,
}

impl<T> std::fmt::Debug for RingBuffer<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RingBuffer")
			.field("name", &self.shared.name)
			.field("capacity", &self.shared.slots.capacity())
			.field("write_sequence", &self.shared.write.get())
			.field("consumers", &self.shared.registry.len())
			.finish()
	}
}

impl<T> RingBuffer<T>
where
	T: Send + Sync + 'static,
{
	/// Creates a ring with `capacity` slots whose consumer tasks run on `runtime`.
	///
	/// # Errors
	///
	/// Returns [`RingError::InvalidCapacity`] unless `capacity` is a non-zero
	/// power of two.
	pub fn create(capacity: usize, runtime: Handle) -> Result<(Self, Publisher<T>)> {
		RingBuilder::new().capacity(capacity).runtime(runtime).build()
	}

	pub(crate) fn with_config(config: RingConfig, runtime: Handle) -> Result<(Self, Publisher<T>)> {
		let slots = SlotStore::new(config.capacity)?;
		let shared = Arc::new(RingShared {
			id: RING_IDS.fetch_add(1, Ordering::Relaxed),
			name: config.name,
			slots,
			write: Sequence::new(0),
			registry: Registry::default(),
			wait: config.wait,
			data: Signal::default(),
			space: Signal::default(),
			shut: AtomicBool::new(false),
			shutdown: CancellationToken::new(),
			release_consumed: config.release_consumed,
			released: AtomicU64::new(0),
		});
		tracing::debug!(
			ring = %shared.name,
			capacity = config.capacity,
			wait = ?shared.wait,
			release_consumed = config.release_consumed,
			"ring.create"
		);
		let publisher = Publisher::new(Arc::clone(&shared));
		Ok((Self { shared, runtime }, publisher))
	}

	pub fn name(&self) -> &str {
		&self.shared.name
	}

	pub fn capacity(&self) -> usize {
		self.shared.slots.capacity() as usize
	}

	/// Sequence the next published entry will receive.
	pub fn write_sequence(&self) -> u64 {
		self.shared.write.get()
	}

	pub fn has_consumers(&self) -> bool {
		self.consumer_count() > 0
	}

	/// Consumers registered and not yet terminated, including draining ones.
	pub fn consumer_count(&self) -> usize {
		self.shared.registry.len()
	}

	pub fn is_shut_down(&self) -> bool {
		self.shared.is_shut()
	}

	/// Registers `consumer` and starts its task.
	///
	/// The consumer receives every entry published from the current write
	/// sequence on; earlier entries are not redelivered.
	///
	/// # Errors
	///
	/// Returns [`RingError::Shutdown`] once the ring is shut down.
	pub fn add_consumer<C>(&self, consumer: C) -> Result<ConsumerHandle>
	where
		C: Consumer<T>,
	{
		let id = self.shared.registry.next_id().ok_or(RingError::Shutdown)?;
		let member = Arc::new(Member::new(id, self.shared.id, self.shared.shutdown.child_token()));

		self.shared
			.registry
			.register(&member, &self.shared.write, || {
				let task = crate::runner::run_consumer(Arc::clone(&self.shared), Arc::clone(&member), consumer);
				let join = crate::spawn::spawn_consumer(&self.runtime, &self.shared.name, id, task);
				ConsumerHandle {
					member: Arc::clone(&member),
					join: Arc::new(JoinCtrl::new(join)),
				}
			})
			.ok_or(RingError::Shutdown)
	}

	/// Closes one consumer: it drains every entry already published, runs its
	/// `close` hook, and terminates before this call returns.
	///
	/// Returns `false` without waiting when the handle belongs to another ring
	/// or is already closed.
	pub async fn remove(&self, handle: &ConsumerHandle) -> bool {
		if !handle.belongs_to(self.shared.id) || handle.is_closed() {
			return false;
		}
		handle.member.request_close();
		tracing::debug!(ring = %self.shared.name, consumer = handle.id(), "ring.consumer.remove");
		handle.closed().await;
		true
	}

	/// Thread-blocking [`Self::remove`] for callers outside async code.
	///
	/// Must not be called from within an async task.
	pub fn blocking_remove(&self, handle: &ConsumerHandle) -> bool {
		futures::executor::block_on(self.remove(handle))
	}

	/// Stops accepting entries and consumers, and closes every consumer after
	/// it drains what was already published. Idempotent.
	pub async fn shutdown(&self, mode: ShutdownMode) -> ShutdownReport {
		let handles = self.begin_shutdown();

		let timed_out = match mode {
			ShutdownMode::NonBlocking => false,
			ShutdownMode::Blocking => {
				for handle in &handles {
					handle.closed().await;
				}
				false
			}
			ShutdownMode::Timeout(timeout) => {
				let deadline = tokio::time::Instant::now() + timeout;
				let mut timed_out = false;
				for handle in &handles {
					let left = deadline.saturating_duration_since(tokio::time::Instant::now());
					if !handle.closed_within(left).await {
						timed_out = true;
						break;
					}
				}
				timed_out
			}
		};

		let pending = handles.iter().filter(|h| !h.is_closed()).count();
		ShutdownReport {
			closed: handles.len() - pending,
			pending,
			timed_out,
		}
	}

	/// [`Self::shutdown`] taking the blocking flag directly.
	pub async fn shutdown_blocking(&self, blocking: bool) -> ShutdownReport {
		let mode = if blocking { ShutdownMode::Blocking } else { ShutdownMode::NonBlocking };
		self.shutdown(mode).await
	}

	/// Thread-blocking [`ShutdownMode::Blocking`] shutdown for callers outside
	/// async code.
	///
	/// Must not be called from within an async task.
	pub fn blocking_shutdown(&self) -> ShutdownReport {
		futures::executor::block_on(self.shutdown(ShutdownMode::Blocking))
	}
}

impl<T> RingBuffer<T> {
	fn begin_shutdown(&self) -> Vec<ConsumerHandle> {
		let first = !self.shared.shut.swap(true, Ordering::AcqRel);
		let handles = self.shared.registry.shut();
		for handle in &handles {
			handle.member.request_close();
		}
		// Wakes consumers (through their child tokens) and a parked producer.
		self.shared.shutdown.cancel();
		if first {
			tracing::debug!(ring = %self.shared.name, consumers = handles.len(), write_sequence = self.shared.write.get(), "ring.shutdown");
		}
		handles
	}
}

impl<T> Drop for RingBuffer<T> {
	fn drop(&mut self) {
		self.begin_shutdown();
	}
}
