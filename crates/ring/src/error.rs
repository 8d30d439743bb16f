/// Errors surfaced by ring buffer construction, publishing, and registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
	/// Capacity must be a non-zero power of two.
	#[error("ring capacity must be a non-zero power of two, got {0}")]
	InvalidCapacity(usize),
	/// The ring has been shut down and accepts no further entries or consumers.
	#[error("ring buffer is shut down")]
	Shutdown,
}

pub type Result<T, E = RingError> = std::result::Result<T, E>;
