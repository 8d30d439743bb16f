use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Join coordination for one consumer task.
///
/// `remove`, `shutdown`, and clones of a handle may all wait on the same task.
/// The join handle stays inside the lock while it is awaited, so a waiter
/// that is cancelled (a timed shutdown, a dropped `select!` arm) leaves it in
/// place for the next one.
pub(crate) struct JoinCtrl {
	task: Mutex<Option<JoinHandle<()>>>,
}

impl JoinCtrl {
	pub(crate) fn new(handle: JoinHandle<()>) -> Self {
		Self {
			task: Mutex::new(Some(handle)),
		}
	}

	/// Waits for the task to terminate.
	pub(crate) async fn join(&self) {
		let mut task = self.task.lock().await;
		let Some(handle) = task.as_mut() else {
			return;
		};
		if let Err(err) = handle.await {
			tracing::warn!(error = %err, "ring.consumer.join_failed");
		}
		*task = None;
	}

	/// Waits for termination up to `timeout`. Returns `true` once the task is done.
	pub(crate) async fn join_with_timeout(&self, timeout: Duration) -> bool {
		tokio::time::timeout(timeout, self.join()).await.is_ok()
	}
}
