//! Ordered single-producer, multi-consumer ring buffer.
//!
//! A [`RingBuffer`] holds a fixed, power-of-two number of slots. Its paired
//! [`Publisher`] appends entries; every registered [`Consumer`] runs on its
//! own Tokio task and receives, in publish order and exactly once, each entry
//! published after it joined. The publisher waits instead of overwriting a
//! slot the slowest live consumer has not read yet.
//!
//! Closing is cooperative: [`RingBuffer::remove`] and
//! [`RingBuffer::shutdown`] let consumers drain everything already published
//! before their `close` hook runs.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use ringcast_ring::{Consumer, RingBuilder, ShutdownMode};
//!
//! struct Print;
//!
//! #[async_trait]
//! impl Consumer<String> for Print {
//! 	async fn consume(&mut self, entry: &String, position: u64) -> bool {
//! 		println!("{position}: {entry}");
//! 		true
//! 	}
//! }
//!
//! # async fn demo() -> Result<(), ringcast_ring::RingError> {
//! let (ring, mut publisher) = RingBuilder::new().capacity(64).name("changes").build::<String>()?;
//! let printer = ring.add_consumer(Print)?;
//! publisher.add("node added".to_string()).await?;
//! ring.remove(&printer).await;
//! ring.shutdown(ShutdownMode::Blocking).await;
//! # Ok(())
//! # }
//! ```

mod config;
mod consumer;
mod error;
mod join_ctrl;
mod producer;
mod registry;
mod ring;
mod runner;
mod sequence;
mod slots;
mod spawn;
mod wait;

pub use config::{DEFAULT_CAPACITY, DEFAULT_NAME, RingBuilder, RingConfig};
pub use consumer::{Consumer, ConsumerExit, ConsumerHandle, ConsumerState};
pub use error::{Result, RingError};
pub use producer::Publisher;
pub use ring::{RingBuffer, ShutdownMode, ShutdownReport};
pub use wait::WaitStrategy;
