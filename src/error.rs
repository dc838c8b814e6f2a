//! Error types for handoff
//!
//! This module provides the failure vocabulary shared by the channels and the
//! background task wrapper:
//! - [`Error`]: crate-level failures (configuration, spawn, channel misuse)
//! - [`FailureKind`] and [`Classify`]: operational classification of any failure
//! - [`TaskError`]: what [`GuardedTask::finish_up`](crate::task::GuardedTask::finish_up) rethrows
//! - [`StageError`]: what the partial-result accessors report
//! - [`AddError`]: a rejected [`HandoffQueue::add`](crate::queue::HandoffQueue::add)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for handoff operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used when an unexpected failure is wrapped
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for handoff
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "ring_capacity")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The background thread could not be created
    #[error("failed to spawn background thread for task {task}: {source}")]
    Spawn {
        /// Name of the task whose thread failed to start
        task: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The consumer abandoned the channel; the producer should stop
    #[error("consumer abandoned the channel")]
    Abandoned,

    /// The producer already signalled end of data
    #[error("producer already signalled end of data")]
    AlreadyEnded,

    /// The operation observed a cancellation request and unwound
    #[error("operation cancelled")]
    Cancelled,

    /// `start()` was called on a task that was already started
    #[error("task {task} was already started")]
    AlreadyStarted {
        /// Name of the task
        task: String,
    },
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Operational classification of a failure
///
/// Collaborators decide retry policy from this; the primitives never retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection/socket timeouts, remote temporarily unreachable
    Transient,
    /// Credentials or permissions rejected; not retryable without reconfiguration
    Authentication,
    /// The call unwound because the initiator aborted it
    Cancelled,
    /// Anything the call site did not anticipate (a programming error)
    Unexpected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::Authentication => "authentication",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Trait for errors that can be classified by [`FailureKind`]
///
/// Implement this for the error type a background call returns. Connectors
/// usually map their protocol errors onto `Transient` or `Authentication` and
/// leave everything else `Unexpected`.
pub trait Classify {
    /// The operational kind of this failure
    fn failure_kind(&self) -> FailureKind;

    /// Returns true if the failure is transient and the collaborator may retry
    fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }

    /// Returns true if the failure was caused by a deliberate abort
    fn is_cancellation(&self) -> bool {
        self.failure_kind() == FailureKind::Cancelled
    }
}

impl Classify for io::Error {
    fn failure_kind(&self) -> FailureKind {
        if self
            .get_ref()
            .is_some_and(|inner| inner.downcast_ref::<Interrupted>().is_some())
        {
            return FailureKind::Cancelled;
        }
        match self.kind() {
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::UnexpectedEof => FailureKind::Transient,
            io::ErrorKind::PermissionDenied => FailureKind::Authentication,
            io::ErrorKind::Interrupted => FailureKind::Cancelled,
            _ => FailureKind::Unexpected,
        }
    }
}

impl Classify for Error {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Io(e) => e.failure_kind(),
            // The consumer going away is how cancellation reaches a producer
            Error::Abandoned | Error::Cancelled => FailureKind::Cancelled,
            Error::Config { .. }
            | Error::Spawn { .. }
            | Error::AlreadyEnded
            | Error::AlreadyStarted { .. } => FailureKind::Unexpected,
        }
    }
}

/// Raised by [`TaskContext::checkpoint`](crate::task::TaskContext::checkpoint)
/// and [`TaskContext::sleep`](crate::task::TaskContext::sleep) once the task
/// has been aborted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("interrupted by abort request")]
pub struct Interrupted;

impl Classify for Interrupted {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Cancelled
    }
}

impl From<Interrupted> for io::Error {
    fn from(e: Interrupted) -> Self {
        io::Error::new(io::ErrorKind::Interrupted, e)
    }
}

impl From<Interrupted> for Error {
    fn from(_: Interrupted) -> Self {
        Error::Cancelled
    }
}

/// Failure rethrown by `finish_up`
///
/// The body's own error passes through unchanged when it is one of the kinds
/// the call site declared (transient or authentication). Cancellation is
/// reported as [`TaskError::Cancelled`]; anything classified `Unexpected`, and
/// any panic, is wrapped so it cannot be mistaken for an operational failure.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The background call failed with a declared, operational error
    #[error(transparent)]
    Failed(E),

    /// The background call unwound because it was aborted
    #[error("task {task} was cancelled")]
    Cancelled {
        /// Name of the task
        task: String,
    },

    /// The background call failed in a way its call site did not anticipate
    #[error("unexpected failure in task {task}: {source}")]
    Unexpected {
        /// Name of the task
        task: String,
        /// The original failure
        #[source]
        source: BoxError,
    },

    /// The background call panicked
    #[error("task {task} panicked: {message}")]
    Panicked {
        /// Name of the task
        task: String,
        /// Panic payload rendered as text
        message: String,
    },

    /// A bounded join expired; the thread was aborted and detached
    #[error("task {task} did not finish within {after:?}")]
    TimedOut {
        /// Name of the task
        task: String,
        /// The bound that expired
        after: Duration,
    },

    /// `finish_up` was called on a task that never ran
    #[error("task {task} was never started")]
    NotStarted {
        /// Name of the task
        task: String,
    },
}

impl<E> TaskError<E> {
    /// Returns the declared error if this is [`TaskError::Failed`]
    pub fn into_failed(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for TaskError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            TaskError::Failed(e) => e.failure_kind(),
            TaskError::Cancelled { .. } => FailureKind::Cancelled,
            TaskError::TimedOut { .. } => FailureKind::Transient,
            TaskError::Unexpected { .. }
            | TaskError::Panicked { .. }
            | TaskError::NotStarted { .. } => FailureKind::Unexpected,
        }
    }
}

/// Failure reported by a partial-result accessor
///
/// The owned failure is only handed out by `finish_up`; accessors see a
/// snapshot of its kind and message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StageError {
    /// The task failed before publishing the stage
    #[error("task failed before reaching stage {stage} ({kind}): {message}")]
    Failed {
        /// Stage that was awaited
        stage: &'static str,
        /// Classification of the captured failure
        kind: FailureKind,
        /// Rendered failure message
        message: String,
    },

    /// The task finished successfully without publishing the stage
    #[error("task finished without reaching stage {stage}")]
    NotReached {
        /// Stage that was awaited
        stage: &'static str,
    },

    /// The stage value was already moved out by `take_stage`
    #[error("stage {stage} was already taken")]
    AlreadyTaken {
        /// Stage that was awaited
        stage: &'static str,
    },

    /// The stage was published with a different value type
    #[error("stage {stage} holds a value of a different type")]
    TypeMismatch {
        /// Stage that was awaited
        stage: &'static str,
    },

    /// The task has not been started, so the stage can never be reached
    #[error("task was not started; stage {stage} cannot be reached")]
    NotStarted {
        /// Stage that was awaited
        stage: &'static str,
    },

    /// A bounded wait expired
    #[error("timed out after {after:?} waiting for stage {stage}")]
    TimedOut {
        /// Stage that was awaited
        stage: &'static str,
        /// The bound that expired
        after: Duration,
    },
}

impl Classify for StageError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            StageError::Failed { kind, .. } => *kind,
            StageError::TimedOut { .. } => FailureKind::Transient,
            StageError::NotReached { .. }
            | StageError::AlreadyTaken { .. }
            | StageError::TypeMismatch { .. }
            | StageError::NotStarted { .. } => FailureKind::Unexpected,
        }
    }
}

/// A rejected add; the item is handed back to the producer
#[derive(PartialEq, Eq)]
pub enum AddError<T> {
    /// The consumer abandoned the queue
    Abandoned(T),
    /// The producer already signalled done
    Completed(T),
}

impl<T> AddError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            AddError::Abandoned(item) | AddError::Completed(item) => item,
        }
    }
}

// Manual impls so T does not need Debug/Display
impl<T> fmt::Debug for AddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::Abandoned(_) => f.write_str("Abandoned(..)"),
            AddError::Completed(_) => f.write_str("Completed(..)"),
        }
    }
}

impl<T> fmt::Display for AddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::Abandoned(_) => f.write_str("consumer abandoned the queue"),
            AddError::Completed(_) => f.write_str("producer already signalled done"),
        }
    }
}

impl<T> std::error::Error for AddError<T> {}

impl<T> Classify for AddError<T> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            AddError::Abandoned(_) => FailureKind::Cancelled,
            AddError::Completed(_) => FailureKind::Unexpected,
        }
    }
}

impl<T> From<AddError<T>> for Error {
    fn from(e: AddError<T>) -> Self {
        match e {
            AddError::Abandoned(_) => Error::Abandoned,
            AddError::Completed(_) => Error::AlreadyEnded,
        }
    }
}
