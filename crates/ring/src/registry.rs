//! Membership registry: the set of live consumers and the gating snapshot the
//! producer scans for backpressure.
//!
//! Mutations take a short `parking_lot` lock and then publish a fresh
//! immutable [`GatingSet`] through `ArcSwap`, so the producer never touches
//! the lock.

use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::consumer::{ConsumerHandle, Member};
use crate::sequence::Sequence;

/// Immutable snapshot of the consumers that gate the producer.
pub(crate) struct GatingSet {
	/// Bumped on every membership change.
	pub(crate) generation: u64,
	pub(crate) members: Vec<Arc<Member>>,
}

impl GatingSet {
	/// Smallest `next` sequence among the members, or `None` when empty.
	pub(crate) fn min_next(&self) -> Option<u64> {
		self.members.iter().map(|m| m.next.get_seq_cst()).min()
	}
}

#[derive(Default)]
struct RegistryState {
	handles: Vec<ConsumerHandle>,
	next_id: u64,
	generation: u64,
	shut: bool,
}

pub(crate) struct Registry {
	state: Mutex<RegistryState>,
	gating: ArcSwap<GatingSet>,
}

impl Default for Registry {
	fn default() -> Self {
		Self {
			state: Mutex::new(RegistryState::default()),
			gating: ArcSwap::from_pointee(GatingSet {
				generation: 0,
				members: Vec::new(),
			}),
		}
	}
}

impl Registry {
	pub(crate) fn gating(&self) -> arc_swap::Guard<Arc<GatingSet>> {
		self.gating.load()
	}

	/// Allocates the next consumer id, or `None` once shut.
	pub(crate) fn next_id(&self) -> Option<u64> {
		let mut st = self.state.lock();
		if st.shut {
			return None;
		}
		st.next_id = st.next_id.wrapping_add(1);
		Some(st.next_id)
	}

	/// Adds `member` to the gating set, fixes its join sequence, and starts it.
	///
	/// The member first gates at a conservative sequence, becomes visible to
	/// the producer, and only then reads the write sequence it actually joins
	/// at. Any publish the producer made without seeing the member is then
	/// already covered by that second read. `start` runs under the registry
	/// lock so a concurrent `shut` always sees the returned handle. Returns
	/// `None` once the registry is shut.
	pub(crate) fn register(&self, member: &Arc<Member>, write: &Sequence, start: impl FnOnce() -> ConsumerHandle) -> Option<ConsumerHandle> {
		let mut st = self.state.lock();
		if st.shut {
			return None;
		}
		member.next.publish(write.get_seq_cst());

		st.generation = st.generation.wrapping_add(1);
		let mut members = self.gating.load().members.clone();
		members.push(Arc::clone(member));
		self.gating.store(Arc::new(GatingSet {
			generation: st.generation,
			members,
		}));
		fence(Ordering::SeqCst);

		let joined_at = write.get_seq_cst();
		member.next.publish(joined_at);
		member.joined_at.publish(joined_at);

		let handle = start();
		st.handles.push(handle.clone());
		Some(handle)
	}

	/// Drops a terminated member from the gating set and the handle list.
	pub(crate) fn leave(&self, id: u64) {
		let mut st = self.state.lock();
		st.handles.retain(|h| h.member.id != id);
		st.generation = st.generation.wrapping_add(1);
		let members = self.gating.load().members.iter().filter(|m| m.id != id).cloned().collect();
		self.gating.store(Arc::new(GatingSet {
			generation: st.generation,
			members,
		}));
		// Pairs with the producer's fence before it re-reads the snapshot.
		fence(Ordering::SeqCst);
	}

	/// Marks the registry shut and returns every tracked handle.
	pub(crate) fn shut(&self) -> Vec<ConsumerHandle> {
		let mut st = self.state.lock();
		st.shut = true;
		st.handles.clone()
	}

	pub(crate) fn len(&self) -> usize {
		self.state.lock().handles.len()
	}
}
