//! Change-notification bus on top of [`ringcast_ring`].
//!
//! Every registered [`ChangeListener`] receives each event published after it
//! registered, in publish order, on its own task. Any number of tasks may
//! publish; publishes are serialized through one ring publisher.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use ringcast_ring::{Consumer, ConsumerHandle, Publisher, Result, RingBuffer, RingBuilder, RingConfig, ShutdownMode, ShutdownReport};

/// Receives the events published on a [`ChangeBus`].
#[async_trait]
pub trait ChangeListener<E>: Send + 'static
where
	E: Sync,
{
	async fn notify(&mut self, event: &E);

	/// Called once after the last event delivered to this listener.
	async fn closed(&mut self) {}
}

/// Identifies one registration on a [`ChangeBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "listener-{}", self.0)
	}
}

struct ListenerConsumer<L> {
	listener: L,
}

#[async_trait]
impl<E, L> Consumer<E> for ListenerConsumer<L>
where
	E: Send + Sync + 'static,
	L: ChangeListener<E>,
{
	async fn consume(&mut self, entry: &E, _position: u64) -> bool {
		self.listener.notify(entry).await;
		true
	}

	async fn close(&mut self) {
		self.listener.closed().await;
	}
}

/// Fan-out of change events to a dynamic set of listeners.
pub struct ChangeBus<E> {
	ring: RingBuffer<E>,
	publisher: tokio::sync::Mutex<Publisher<E>>,
	listeners: Mutex<HashMap<ListenerId, ConsumerHandle>>,
}

impl<E> fmt::Debug for ChangeBus<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChangeBus")
			.field("ring", &self.ring)
			.field("listeners", &self.listeners.lock().len())
			.finish()
	}
}

impl<E> ChangeBus<E>
where
	E: Send + Sync + 'static,
{
	/// Creates a bus buffering up to `capacity` undelivered events.
	///
	/// Must be called inside a Tokio runtime or with the fallback runtime
	/// available; listener tasks are spawned there.
	pub fn new(capacity: usize) -> Result<Self> {
		Self::from_config(RingConfig {
			capacity,
			name: "change-bus".to_string(),
			..RingConfig::default()
		})
	}

	pub fn from_config(config: RingConfig) -> Result<Self> {
		let (ring, publisher) = RingBuilder::from_config(config).build()?;
		Ok(Self {
			ring,
			publisher: tokio::sync::Mutex::new(publisher),
			listeners: Mutex::new(HashMap::new()),
		})
	}

	/// Registers `listener`; it sees every event published from now on.
	///
	/// # Errors
	///
	/// Returns [`ringcast_ring::RingError::Shutdown`] after [`Self::shutdown`].
	pub fn register<L>(&self, listener: L) -> Result<ListenerId>
	where
		L: ChangeListener<E>,
	{
		let handle = self.ring.add_consumer(ListenerConsumer { listener })?;
		let id = ListenerId(handle.id());
		tracing::debug!(ring = %self.ring.name(), listener = %id, "bus.listener.register");
		self.listeners.lock().insert(id, handle);
		Ok(id)
	}

	/// Unregisters a listener once it has received every event already
	/// published. Returns `false` for unknown ids and for listeners that
	/// already stopped on their own.
	pub async fn unregister(&self, id: ListenerId) -> bool {
		let Some(handle) = self.listeners.lock().remove(&id) else {
			return false;
		};
		tracing::debug!(ring = %self.ring.name(), listener = %id, "bus.listener.unregister");
		self.ring.remove(&handle).await
	}

	/// Publishes one event, waiting while the slowest listener is a full
	/// buffer behind.
	///
	/// # Errors
	///
	/// Returns [`ringcast_ring::RingError::Shutdown`] after [`Self::shutdown`].
	pub async fn notify(&self, event: E) -> Result<()> {
		self.publisher.lock().await.add(event).await
	}

	/// Publishes `events` as one uninterrupted run: no other publisher's
	/// events are interleaved.
	pub async fn notify_all<I>(&self, events: I) -> Result<()>
	where
		I: IntoIterator<Item = E>,
	{
		self.publisher.lock().await.add_all(events).await
	}

	pub fn has_listeners(&self) -> bool {
		self.listener_count() > 0
	}

	/// Listeners still receiving events. Listeners that faulted are forgotten
	/// here.
	pub fn listener_count(&self) -> usize {
		let mut listeners = self.listeners.lock();
		listeners.retain(|id, handle| {
			let live = !handle.is_closed();
			if !live {
				tracing::warn!(ring = %self.ring.name(), listener = %id, exit = ?handle.exit(), "bus.listener.lost");
			}
			live
		});
		listeners.len()
	}

	/// Stops accepting events and waits for every listener to receive what was
	/// already published and close.
	pub async fn shutdown(&self) -> ShutdownReport {
		let report = self.ring.shutdown(ShutdownMode::Blocking).await;
		self.listeners.lock().clear();
		report
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::time::Duration;

	use ringcast_ring::RingError;

	use super::*;

	#[derive(Clone, Default)]
	struct Seen {
		events: Arc<Mutex<Vec<String>>>,
		closed: Arc<AtomicBool>,
	}

	#[async_trait]
	impl ChangeListener<String> for Seen {
		async fn notify(&mut self, event: &String) {
			self.events.lock().push(event.clone());
		}

		async fn closed(&mut self) {
			self.closed.store(true, Ordering::SeqCst);
		}
	}

	impl Seen {
		fn events(&self) -> Vec<String> {
			self.events.lock().clone()
		}
	}

	struct Explodes;

	#[async_trait]
	impl ChangeListener<String> for Explodes {
		async fn notify(&mut self, event: &String) {
			if event == "boom" {
				panic!("listener exploded");
			}
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn unregister_delivers_everything_published_before() {
		let bus = ChangeBus::<String>::new(8).unwrap();
		let seen = Seen::default();
		let id = bus.register(seen.clone()).unwrap();

		for i in 0..20 {
			bus.notify(format!("change-{i}")).await.unwrap();
		}
		assert!(bus.unregister(id).await);

		let expected: Vec<_> = (0..20).map(|i| format!("change-{i}")).collect();
		assert_eq!(seen.events(), expected);
		assert!(seen.closed.load(Ordering::SeqCst));
		assert!(!bus.has_listeners());
		assert!(!bus.unregister(id).await);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn concurrent_publishers_are_serialized() {
		let bus = Arc::new(ChangeBus::<String>::new(4).unwrap());
		let seen = Seen::default();
		bus.register(seen.clone()).unwrap();

		let tasks: Vec<_> = (0..4)
			.map(|p| {
				let bus = Arc::clone(&bus);
				tokio::spawn(async move {
					for i in 0..50 {
						bus.notify(format!("{p}:{i}")).await.unwrap();
					}
				})
			})
			.collect();
		for task in tasks {
			task.await.unwrap();
		}
		bus.shutdown().await;

		let events = seen.events();
		assert_eq!(events.len(), 200);
		for p in 0..4 {
			let mine: Vec<_> = events.iter().filter(|e| e.starts_with(&format!("{p}:"))).cloned().collect();
			let expected: Vec<_> = (0..50).map(|i| format!("{p}:{i}")).collect();
			assert_eq!(mine, expected);
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn batches_are_not_interleaved() {
		let bus = ChangeBus::<String>::new(4).unwrap();
		let seen = Seen::default();
		bus.register(seen.clone()).unwrap();

		bus.notify_all((0..10).map(|i| format!("batch-{i}"))).await.unwrap();
		bus.notify("tail".to_string()).await.unwrap();
		let report = bus.shutdown().await;

		assert!(report.completed());
		assert_eq!(seen.events().len(), 11);
		assert_eq!(seen.events().last().map(String::as_str), Some("tail"));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn faulting_listener_is_forgotten() {
		let bus = ChangeBus::<String>::new(8).unwrap();
		let seen = Seen::default();
		bus.register(seen.clone()).unwrap();
		let bad = bus.register(Explodes).unwrap();
		assert_eq!(bus.listener_count(), 2);

		bus.notify("boom".to_string()).await.unwrap();
		bus.notify("after".to_string()).await.unwrap();

		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		while bus.listener_count() != 1 {
			assert!(tokio::time::Instant::now() < deadline, "faulted listener never closed");
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert!(!bus.unregister(bad).await);

		bus.shutdown().await;
		assert_eq!(seen.events(), vec!["boom".to_string(), "after".to_string()]);
	}

	#[tokio::test]
	async fn shutdown_refuses_further_use() {
		let bus = ChangeBus::<String>::new(2).unwrap();
		bus.shutdown().await;
		assert_eq!(bus.notify("late".to_string()).await, Err(RingError::Shutdown));
		assert_eq!(bus.register(Seen::default()).err(), Some(RingError::Shutdown));
	}

	#[test]
	fn rejects_bad_capacity() {
		assert_eq!(ChangeBus::<String>::new(6).err(), Some(RingError::InvalidCapacity(6)));
	}
}
