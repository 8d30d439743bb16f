use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Returns the ambient runtime handle, or a shared fallback runtime when
/// called outside of any Tokio context (plain threads, `blocking_*` callers).
pub(crate) fn runtime_handle() -> Handle {
	if let Ok(handle) = Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("ringcast-consumer")
			.build()
			.expect("failed to build ringcast fallback tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns one consumer task on `runtime`.
pub(crate) fn spawn_consumer<F>(runtime: &Handle, ring: &str, consumer: u64, fut: F) -> JoinHandle<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	tracing::trace!(ring, consumer, "ring.consumer.spawn");
	runtime.spawn(fut)
}
