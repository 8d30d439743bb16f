//! The per-consumer task loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::consumer::{Consumer, ConsumerExit, Member};
use crate::ring::RingShared;

/// Runs `consumer` until it is closed, stops itself, or faults, then closes it
/// and removes it from the registry.
pub(crate) async fn run_consumer<T, C>(shared: Arc<RingShared<T>>, member: Arc<Member>, mut consumer: C)
where
	T: Send + Sync + 'static,
	C: Consumer<T>,
{
	member.mark_running();
	tracing::debug!(ring = %shared.name, consumer = member.id, joined_at = member.joined_at.get(), "ring.consumer.start");

	let exit = drive(&shared, &member, &mut consumer).await;

	if let Err(payload) = AssertUnwindSafe(consumer.close()).catch_unwind().await {
		tracing::error!(
			ring = %shared.name,
			consumer = member.id,
			panic = panic_message(payload.as_ref()).unwrap_or("<non-string panic>"),
			"ring.consumer.close_failed"
		);
	}

	tracing::debug!(
		ring = %shared.name,
		consumer = member.id,
		next = member.next.get(),
		exit = ?exit,
		"ring.consumer.exit"
	);
	// Closed before leaving: a shutdown that no longer finds this member in
	// the registry must already see it closed.
	member.finish(exit);
	shared.registry.leave(member.id);
	// The producer may be parked on this consumer's cursor.
	shared.space.wake();
	shared.release_consumed();
}

/// Consumes entries in order until a close request has been drained, the
/// consumer stops, or it faults.
async fn drive<T, C>(shared: &RingShared<T>, member: &Member, consumer: &mut C) -> ConsumerExit
where
	T: Send + Sync + 'static,
	C: Consumer<T>,
{
	let mut next = member.next.get();
	loop {
		// Read the close flag before the write sequence: everything published
		// before the close request is then within `published`.
		let closing = member.close.is_cancelled();
		let published = shared.write.get();

		while next < published {
			// SAFETY: `next < published`, and our cursor (`member.next == next`)
			// keeps the producer from overwriting this slot until we advance.
			let Some(entry) = (unsafe { shared.slots.read(next) }) else {
				tracing::error!(ring = %shared.name, consumer = member.id, sequence = next, "ring.consumer.overrun");
				return ConsumerExit::Faulted(format!("slot for sequence {next} was overwritten before it was read"));
			};

			let outcome = AssertUnwindSafe(consumer.consume(entry, next)).catch_unwind().await;
			next += 1;
			member.next.publish(next);
			shared.space.wake();
			shared.release_consumed();

			match outcome {
				Ok(true) => {}
				Ok(false) => return ConsumerExit::Stopped,
				Err(payload) => {
					let message = panic_message(payload.as_ref()).unwrap_or("<non-string panic>").to_string();
					tracing::error!(ring = %shared.name, consumer = member.id, sequence = next - 1, panic = %message, "ring.consumer.fault");
					return ConsumerExit::Faulted(message);
				}
			}
		}

		if closing {
			return ConsumerExit::Drained;
		}

		let ready = || (shared.write.get_seq_cst() > next).then_some(());
		tokio::select! {
			biased;
			_ = member.close.cancelled() => {}
			_ = shared.data.wait_until(shared.wait, ready) => {}
		}
	}
}

/// Extracts the message of a `panic!` payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		return Some(s);
	}
	payload.downcast_ref::<String>().map(String::as_str)
}

#[cfg(test)]
mod tests {
	use super::panic_message;

	#[test]
	fn extracts_static_str_payload() {
		let payload = std::panic::catch_unwind(|| panic!("boom-str")).unwrap_err();
		assert_eq!(panic_message(payload.as_ref()), Some("boom-str"));
	}

	#[test]
	fn extracts_string_payload() {
		let payload = std::panic::catch_unwind(|| panic!("{}", String::from("boom-string"))).unwrap_err();
		assert_eq!(panic_message(payload.as_ref()), Some("boom-string"));
	}

	#[test]
	fn other_payloads_have_no_message() {
		let payload = std::panic::catch_unwind(|| std::panic::panic_any(7_u32)).unwrap_err();
		assert_eq!(panic_message(payload.as_ref()), None);
	}
}
