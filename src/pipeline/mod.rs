//! A background task bundled with the channel it feeds.
//!
//! - [`spawn_stream`] runs a body that writes bytes through a
//!   [`StreamBridge`](crate::bridge::StreamBridge) and returns a
//!   [`TaskStream`] the caller reads like any [`std::io::Read`].
//! - [`spawn_items`] runs a body that adds items to a
//!   [`HandoffSender`](crate::queue::HandoffSender) and returns an
//!   [`ItemPipeline`] the caller drains.
//!
//! In both cases the channel is linked to the task, so aborting the task wakes
//! a producer blocked on a full buffer, and closing the consumer side aborts
//! the task.

mod items;
mod stream;

pub use items::{ItemPipeline, spawn_items};
pub use stream::{TaskStream, spawn_stream};

use crate::error::{Classify, FailureKind, Interrupted, TaskError};
use crate::task::GuardedTask;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Render a body failure as the error a stream consumer sees after draining
///
/// The kind is chosen so the consumer's own classification of the
/// [`io::Error`] agrees with the body's. Cancellation is carried as an
/// [`Interrupted`] payload rather than [`io::ErrorKind::Interrupted`], which
/// `Read` helpers silently retry.
pub(crate) fn stream_failure<E: std::error::Error + Classify>(err: &E) -> io::Error {
    let kind = match err.failure_kind() {
        FailureKind::Transient => io::ErrorKind::ConnectionAborted,
        FailureKind::Authentication => io::ErrorKind::PermissionDenied,
        FailureKind::Cancelled => return io::Error::other(Interrupted),
        FailureKind::Unexpected => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.to_string())
}

/// Join on the consumer's behalf
///
/// `consumer_left` is set when the body failed after the channel refused one
/// of its writes; a transient failure is then the consumer's own doing and is
/// reported as cancelled. Other failures pass through.
pub(crate) fn join<T, E>(
    task: GuardedTask<T, E>,
    timeout: Option<Duration>,
    consumer_left: &AtomicBool,
) -> std::result::Result<T, TaskError<E>>
where
    T: Send + 'static,
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    let name = task.name().to_string();
    let result = match timeout {
        Some(timeout) => task.finish_up_timeout(timeout),
        None => task.finish_up(),
    };
    match result {
        Err(TaskError::Failed(e))
            if e.failure_kind() == FailureKind::Transient
                && consumer_left.load(Ordering::Acquire) =>
        {
            Err(TaskError::Cancelled { task: name })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Kinded(FailureKind);

    impl Classify for Kinded {
        fn failure_kind(&self) -> FailureKind {
            self.0
        }
    }

    #[test]
    fn test_stream_failure_keeps_classification() {
        for kind in [
            FailureKind::Transient,
            FailureKind::Authentication,
            FailureKind::Cancelled,
            FailureKind::Unexpected,
        ] {
            let io_err = stream_failure(&Kinded(kind));
            assert_eq!(io_err.failure_kind(), kind, "{kind}");
        }
    }
}
