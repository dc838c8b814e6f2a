//! # handoff
//!
//! Cross-thread streaming and cancellable background calls for blocking
//! connector code.
//!
//! ## Design Philosophy
//!
//! handoff is designed to be:
//! - **Bounded** - Every channel has a fixed capacity, so a fast producer
//!   blocks instead of buffering without limit
//! - **Cancellable** - The initiator can abort a background call at any point,
//!   including while it is blocked on a full channel
//! - **Honest about failure** - A background failure is rethrown on the
//!   initiator's thread with its classification intact
//!
//! ## Building Blocks
//!
//! - [`RingByteChannel`] - byte stream between one producer and one consumer
//! - [`HandoffQueue`] - bounded FIFO of discrete items
//! - [`StreamBridge`] - [`std::io::Write`] surface over a ring channel
//! - [`GuardedTask`] - blocking call on its own thread with staged partial
//!   results and classified rethrow
//! - [`pipeline`] - a task bundled with the channel it feeds
//!
//! ## Quick Start
//!
//! ```no_run
//! use handoff::{BridgeConfig, Stage, spawn_stream};
//! use std::io::{Read, Write};
//!
//! const STATUS: Stage<u16> = Stage::new("status");
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::default();
//!
//!     let mut response = spawn_stream("fetch", &config, |ctx, body| {
//!         // Status is known before the body is streamed
//!         ctx.publish(STATUS, 200);
//!         body.write_all(b"<html>...</html>")?;
//!         Ok::<_, std::io::Error>(())
//!     })?;
//!
//!     if response.wait_for(STATUS)? == 200 {
//!         let mut page = String::new();
//!         response.read_to_string(&mut page)?;
//!     }
//!     response.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Write-style adapter over a ring channel
pub mod bridge;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Tasks bundled with the channels they feed
pub mod pipeline;
/// Bounded item queue
pub mod queue;
/// Circular byte channel
pub mod ring;
/// Cancellable background calls
pub mod task;
/// Core types shared across modules
pub mod types;

// Re-export commonly used types
pub use bridge::StreamBridge;
pub use config::BridgeConfig;
pub use error::{AddError, Classify, Error, FailureKind, Interrupted, Result, StageError, TaskError};
pub use pipeline::{ItemPipeline, TaskStream, spawn_items, spawn_stream};
pub use queue::{HandoffQueue, HandoffReceiver, HandoffSender};
pub use ring::{ByteSink, ByteSource, RingByteChannel};
pub use task::{GuardedTask, Stage, TaskContext};
pub use types::{Abortable, Phase, TaskStatus};
