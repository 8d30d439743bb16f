use serde::Deserialize;
use tokio::runtime::Handle;

use crate::error::Result;
use crate::producer::Publisher;
use crate::ring::RingBuffer;
use crate::wait::WaitStrategy;

/// Default slot count, matching the repository event bus default.
pub const DEFAULT_CAPACITY: usize = 1 << 10;

/// Default ring name used in log fields.
pub const DEFAULT_NAME: &str = "ring-buffer";

/// Serializable ring settings, suitable for embedding in a host config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RingConfig {
	/// Number of slots; must be a non-zero power of two.
	pub capacity: usize,
	/// Name reported in tracing fields.
	pub name: String,
	/// Wait strategy for both the producer and consumer tasks.
	pub wait: WaitStrategy,
	/// Drop each entry as soon as every consumer has moved past it, instead
	/// of when its slot is next overwritten.
	pub release_consumed: bool,
}

impl Default for RingConfig {
	fn default() -> Self {
		Self {
			capacity: DEFAULT_CAPACITY,
			name: DEFAULT_NAME.to_string(),
			wait: WaitStrategy::default(),
			release_consumed: false,
		}
	}
}

/// Builder for a [`RingBuffer`] and its [`Publisher`].
#[derive(Debug, Clone, Default)]
pub struct RingBuilder {
	config: RingConfig,
	runtime: Option<Handle>,
}

impl RingBuilder {
	/// Starts from [`RingConfig::default`].
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts from `config`.
	pub fn from_config(config: RingConfig) -> Self {
		Self { config, runtime: None }
	}

	/// Sets the slot count.
	#[must_use]
	pub fn capacity(mut self, capacity: usize) -> Self {
		self.config.capacity = capacity;
		self
	}

	/// Sets the ring name.
	#[must_use]
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.config.name = name.into();
		self
	}

	/// Sets the wait strategy.
	#[must_use]
	pub fn wait(mut self, wait: WaitStrategy) -> Self {
		self.config.wait = wait;
		self
	}

	/// Releases consumed entries eagerly. See [`RingConfig::release_consumed`].
	#[must_use]
	pub fn release_consumed(mut self, release: bool) -> Self {
		self.config.release_consumed = release;
		self
	}

	/// Sets the runtime consumer tasks are spawned on.
	///
	/// Defaults to the runtime current at build time, or a shared fallback runtime.
	#[must_use]
	pub fn runtime(mut self, runtime: Handle) -> Self {
		self.runtime = Some(runtime);
		self
	}

	/// Builds the ring.
	///
	/// # Errors
	///
	/// Returns [`crate::RingError::InvalidCapacity`] unless the capacity is a
	/// non-zero power of two.
	pub fn build<T>(self) -> Result<(RingBuffer<T>, Publisher<T>)>
	where
		T: Send + Sync + 'static,
	{
		let runtime = self.runtime.unwrap_or_else(crate::spawn::runtime_handle);
		RingBuffer::with_config(self.config, runtime)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		let config: RingConfig = toml::from_str("").unwrap();
		assert_eq!(config, RingConfig::default());
		assert_eq!(config.capacity, 1024);
	}

	#[test]
	fn full_document_overrides_every_field() {
		let config: RingConfig = toml::from_str(
			r#"
			capacity = 64
			name = "changes"
			wait = { yielding = { spins = 8 } }
			release_consumed = true
			"#,
		)
		.unwrap();
		assert_eq!(
			config,
			RingConfig {
				capacity: 64,
				name: "changes".to_string(),
				wait: WaitStrategy::Yielding { spins: 8 },
				release_consumed: true,
			}
		);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(toml::from_str::<RingConfig>("size = 8").is_err());
	}

	#[tokio::test]
	async fn builder_rejects_bad_capacity() {
		let err = RingBuilder::new().capacity(6).build::<u32>().err();
		assert_eq!(err, Some(crate::RingError::InvalidCapacity(6)));
	}
}
