use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::join_ctrl::JoinCtrl;
use crate::sequence::Sequence;

/// Callback driven by one consumer task.
///
/// Each consumer is called from a single task at a time, so implementations
/// need no internal synchronization.
#[async_trait]
pub trait Consumer<T>: Send + 'static
where
	T: Sync,
{
	/// Handles the entry published at `position`.
	///
	/// Returning `false` stops this consumer: it is closed without draining
	/// the entries after `position`.
	async fn consume(&mut self, entry: &T, position: u64) -> bool;

	/// Called once after the last `consume`, whatever the reason for stopping.
	async fn close(&mut self) {}
}

/// Lifecycle state of one registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
	/// Registered, task not started yet.
	Registered = 0,
	/// Task is consuming entries.
	Running = 1,
	/// Close requested; the task drains already-published entries.
	Closing = 2,
	/// Task has terminated and `close` has run.
	Closed = 3,
}

impl ConsumerState {
	fn from_u8(value: u8) -> Self {
		match value {
			0 => Self::Registered,
			1 => Self::Running,
			2 => Self::Closing,
			_ => Self::Closed,
		}
	}
}

/// Why a consumer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
	/// Closed by `remove` or `shutdown` after draining.
	Drained,
	/// `consume` returned `false`.
	Stopped,
	/// `consume` panicked or the consumer read an overwritten slot.
	Faulted(String),
}

impl ConsumerExit {
	/// `true` when the consumer faulted rather than stopping cleanly.
	pub fn is_failure(&self) -> bool {
		matches!(self, Self::Faulted(_))
	}
}

/// State shared by a consumer task, its handles, and the producer's gating scan.
pub(crate) struct Member {
	pub(crate) id: u64,
	ring_id: u64,
	/// Next sequence this consumer will read (`cursor + 1`).
	pub(crate) next: Sequence,
	/// Sequence the consumer joined at.
	pub(crate) joined_at: Sequence,
	state: AtomicU8,
	exit: OnceLock<ConsumerExit>,
	pub(crate) close: CancellationToken,
}

impl Member {
	pub(crate) fn new(id: u64, ring_id: u64, close: CancellationToken) -> Self {
		Self {
			id,
			ring_id,
			next: Sequence::default(),
			joined_at: Sequence::default(),
			state: AtomicU8::new(ConsumerState::Registered as u8),
			exit: OnceLock::new(),
			close,
		}
	}

	pub(crate) fn state(&self) -> ConsumerState {
		ConsumerState::from_u8(self.state.load(Ordering::Acquire))
	}

	/// `Registered -> Running`; a no-op when a close was already requested.
	pub(crate) fn mark_running(&self) {
		let _ = self.state.compare_exchange(
			ConsumerState::Registered as u8,
			ConsumerState::Running as u8,
			Ordering::AcqRel,
			Ordering::Acquire,
		);
	}

	/// Requests drain-and-close. Returns `false` if the consumer already closed.
	pub(crate) fn request_close(&self) -> bool {
		let mut current = self.state.load(Ordering::Acquire);
		loop {
			match ConsumerState::from_u8(current) {
				ConsumerState::Closed => return false,
				ConsumerState::Closing => break,
				ConsumerState::Registered | ConsumerState::Running => {
					match self
						.state
						.compare_exchange(current, ConsumerState::Closing as u8, Ordering::AcqRel, Ordering::Acquire)
					{
						Ok(_) => break,
						Err(actual) => current = actual,
					}
				}
			}
		}
		self.close.cancel();
		true
	}

	pub(crate) fn finish(&self, exit: ConsumerExit) {
		let _ = self.exit.set(exit);
		self.state.store(ConsumerState::Closed as u8, Ordering::Release);
	}
}

/// Handle to one registered consumer.
///
/// Cloning is cheap; every clone refers to the same consumer task.
#[derive(Clone)]
pub struct ConsumerHandle {
	pub(crate) member: Arc<Member>,
	pub(crate) join: Arc<JoinCtrl>,
}

impl std::fmt::Debug for ConsumerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConsumerHandle")
			.field("id", &self.member.id)
			.field("state", &self.state())
			.finish()
	}
}

impl ConsumerHandle {
	/// Registry-unique consumer id.
	pub fn id(&self) -> u64 {
		self.member.id
	}

	/// First sequence this consumer receives.
	pub fn joined_at(&self) -> u64 {
		self.member.joined_at.get()
	}

	/// Last fully consumed sequence, or `None` before the first entry.
	pub fn last_consumed(&self) -> Option<u64> {
		let next = self.member.next.get();
		(next > self.joined_at()).then(|| next - 1)
	}

	pub fn state(&self) -> ConsumerState {
		self.member.state()
	}

	pub fn is_closed(&self) -> bool {
		self.state() == ConsumerState::Closed
	}

	/// Exit reason, once closed.
	pub fn exit(&self) -> Option<&ConsumerExit> {
		self.member.exit.get()
	}

	pub(crate) fn belongs_to(&self, ring_id: u64) -> bool {
		self.member.ring_id == ring_id
	}

	/// Waits until the consumer task has terminated.
	pub async fn closed(&self) {
		self.join.join().await;
	}

	/// Waits up to `timeout` for the consumer task to terminate.
	pub async fn closed_within(&self, timeout: Duration) -> bool {
		self.join.join_with_timeout(timeout).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn member() -> Member {
		Member::new(1, 1, CancellationToken::new())
	}

	#[test]
	fn close_request_moves_running_member_to_closing() {
		let m = member();
		m.mark_running();
		assert_eq!(m.state(), ConsumerState::Running);
		assert!(m.request_close());
		assert_eq!(m.state(), ConsumerState::Closing);
		assert!(m.close.is_cancelled());
	}

	#[test]
	fn close_before_start_is_not_undone_by_mark_running() {
		let m = member();
		assert!(m.request_close());
		m.mark_running();
		assert_eq!(m.state(), ConsumerState::Closing);
	}

	#[test]
	fn closed_member_rejects_close_requests() {
		let m = member();
		m.finish(ConsumerExit::Stopped);
		assert!(!m.request_close());
		assert_eq!(m.state(), ConsumerState::Closed);
		assert_eq!(m.exit.get(), Some(&ConsumerExit::Stopped));
	}

	#[test]
	fn repeated_close_requests_are_idempotent() {
		let m = member();
		assert!(m.request_close());
		assert!(m.request_close());
		assert_eq!(m.state(), ConsumerState::Closing);
	}
}
