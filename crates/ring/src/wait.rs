//! Wake-up signalling between the producer and consumer tasks.
//!
//! Both sides follow the same protocol: create a `Notified`, announce the
//! park, re-check the condition, then await. The waking side stores its
//! sequence first and only then looks at the park counter, so the notify
//! lock is taken only when somebody is actually parked.

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use tokio::sync::Notify;

/// How a task waits for a condition that is not yet satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
	/// Park on a notification immediately.
	#[default]
	Blocking,
	/// Yield to the scheduler up to `spins` times before parking.
	Yielding { spins: u32 },
}

impl WaitStrategy {
	fn spins(self) -> u32 {
		match self {
			Self::Blocking => 0,
			Self::Yielding { spins } => spins,
		}
	}
}

#[derive(Debug, Default)]
pub(crate) struct Signal {
	parked: AtomicUsize,
	notify: Notify,
}

impl Signal {
	/// Wakes parked waiters, if any.
	#[inline]
	pub(crate) fn wake(&self) {
		if self.parked.load(Ordering::SeqCst) > 0 {
			self.notify.notify_waiters();
		}
	}

	/// Waits until `ready` returns `Some`, using `strategy` before parking.
	///
	/// `ready` must read the watched sequences with `SeqCst` loads.
	pub(crate) async fn wait_until<R>(&self, strategy: WaitStrategy, mut ready: impl FnMut() -> Option<R>) -> R {
		for _ in 0..strategy.spins() {
			if let Some(value) = ready() {
				return value;
			}
			tokio::task::yield_now().await;
		}

		loop {
			if let Some(value) = ready() {
				return value;
			}

			let mut notified = pin!(self.notify.notified());
			notified.as_mut().enable();
			let _parked = ParkGuard::new(&self.parked);
			if let Some(value) = ready() {
				return value;
			}
			notified.await;
		}
	}
}

/// Keeps the park counter accurate when a wait is dropped mid-park (for
/// example by losing a `select!` against a cancellation token).
struct ParkGuard<'a>(&'a AtomicUsize);

impl<'a> ParkGuard<'a> {
	fn new(parked: &'a AtomicUsize) -> Self {
		parked.fetch_add(1, Ordering::SeqCst);
		Self(parked)
	}
}

impl Drop for ParkGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::AtomicBool;
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn ready_condition_returns_without_parking() {
		let signal = Signal::default();
		let value = signal.wait_until(WaitStrategy::Blocking, || Some(5)).await;
		assert_eq!(value, 5);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn wake_releases_parked_waiter() {
		let signal = Arc::new(Signal::default());
		let flag = Arc::new(AtomicBool::new(false));

		let waiter = {
			let signal = Arc::clone(&signal);
			let flag = Arc::clone(&flag);
			tokio::spawn(async move { signal.wait_until(WaitStrategy::Blocking, || flag.load(Ordering::SeqCst).then_some(())).await })
		};

		tokio::time::sleep(Duration::from_millis(20)).await;
		flag.store(true, Ordering::SeqCst);
		signal.wake();

		tokio::time::timeout(Duration::from_secs(2), waiter)
			.await
			.expect("waiter should wake")
			.expect("waiter should not panic");
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn yielding_strategy_sees_condition_while_spinning() {
		let signal = Arc::new(Signal::default());
		let flag = Arc::new(AtomicBool::new(false));
		let setter = {
			let flag = Arc::clone(&flag);
			tokio::spawn(async move { flag.store(true, Ordering::SeqCst) })
		};
		setter.await.unwrap();
		signal
			.wait_until(WaitStrategy::Yielding { spins: 16 }, || flag.load(Ordering::SeqCst).then_some(()))
			.await;
	}

	#[test]
	fn strategy_parses_from_snake_case() {
		#[derive(Deserialize)]
		struct Doc {
			wait: WaitStrategy,
		}
		let doc: Doc = toml::from_str("wait = \"blocking\"").unwrap();
		assert_eq!(doc.wait, WaitStrategy::Blocking);
		let doc: Doc = toml::from_str("wait = { yielding = { spins = 64 } }").unwrap();
		assert_eq!(doc.wait, WaitStrategy::Yielding { spins: 64 });
	}
}
