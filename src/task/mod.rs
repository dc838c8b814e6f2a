//! Cancellable background call with staged partial results.
//!
//! A [`GuardedTask`] runs one blocking body on a dedicated thread. The
//! initiator can wait for intermediate results the body publishes as
//! [`Stage`]s (a response status before the body stream, say), abort the body
//! at any point, and finally join it with [`GuardedTask::finish_up`], which
//! hands back the body's value or rethrows its failure in classified form.
//!
//! # Example
//!
//! ```no_run
//! use handoff::task::{GuardedTask, Stage};
//! use std::io;
//!
//! const STATUS: Stage<u16> = Stage::new("status");
//!
//! let mut task = GuardedTask::new("fetch", |ctx| {
//!     ctx.publish(STATUS, 200);
//!     ctx.checkpoint()?;
//!     Ok::<_, io::Error>("body".to_string())
//! });
//! task.start()?;
//! assert_eq!(task.wait_for(STATUS)?, 200);
//! assert_eq!(task.finish_up()?, "body");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod context;

pub use context::TaskContext;

use crate::config::BridgeConfig;
use crate::error::{Classify, Error, FailureKind, Result, StageError, TaskError};
use crate::types::{Phase, TaskStatus};
use context::{StageSlot, TaskMonitor};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Typed key for a partial result
///
/// Declared once, usually as a `const`, and shared by the body that publishes
/// the value and the initiator that awaits it.
pub struct Stage<V> {
    name: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> Stage<V> {
    /// Declare a stage
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    /// The stage's name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<V> Clone for Stage<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Stage<V> {}

impl<V> fmt::Debug for Stage<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stage").field(&self.name).finish()
    }
}

type Body<T, E> = Box<dyn FnOnce(&TaskContext) -> std::result::Result<T, E> + Send>;
type Outcome<T, E> = thread::Result<std::result::Result<T, E>>;

/// A blocking call running on its own thread under the initiator's control
///
/// Dropping a started task without calling one of the `finish_up` variants
/// aborts it and detaches the thread.
pub struct GuardedTask<T, E> {
    name: Arc<str>,
    thread_name: String,
    stack_size: Option<usize>,
    monitor: Arc<TaskMonitor>,
    body: Option<Body<T, E>>,
    handle: Option<JoinHandle<Outcome<T, E>>>,
}

impl<T, E> GuardedTask<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// Wrap `body` without starting it, using default thread settings
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> std::result::Result<T, E> + Send + 'static,
    {
        Self::with_config(name, &BridgeConfig::default(), body)
    }

    /// Wrap `body` without starting it
    ///
    /// The thread is named `{thread_name_prefix}-{name}`.
    pub fn with_config<F>(name: impl Into<String>, config: &BridgeConfig, body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> std::result::Result<T, E> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            thread_name: config.thread_name(&name),
            stack_size: config.stack_size,
            name: Arc::from(name),
            monitor: Arc::new(TaskMonitor::new()),
            body: Some(Box::new(body)),
            handle: None,
        }
    }

    /// Wrap `body` and start it immediately
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(&TaskContext) -> std::result::Result<T, E> + Send + 'static,
    {
        Self::spawn_with_config(name, &BridgeConfig::default(), body)
    }

    /// Wrap `body` with explicit thread settings and start it immediately
    pub fn spawn_with_config<F>(
        name: impl Into<String>,
        config: &BridgeConfig,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce(&TaskContext) -> std::result::Result<T, E> + Send + 'static,
    {
        let mut task = Self::with_config(name, config, body);
        task.start()?;
        Ok(task)
    }

    /// Spawn the background thread
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] on a second call, [`Error::Spawn`] if the OS
    /// refuses the thread (the task is then in [`Phase::Failed`]).
    pub fn start(&mut self) -> Result<()> {
        let body = self.body.take().ok_or_else(|| Error::AlreadyStarted {
            task: self.name.to_string(),
        })?;
        self.monitor.set_phase(Phase::Running);

        let ctx = TaskContext::new(Arc::clone(&self.monitor), Arc::clone(&self.name));
        let monitor = Arc::clone(&self.monitor);
        let mut builder = thread::Builder::new().name(self.thread_name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder
            .spawn(move || run_body(ctx, body))
            .map_err(|source| {
                monitor.finish(
                    Phase::Failed,
                    Some((FailureKind::Unexpected, source.to_string())),
                );
                Error::Spawn {
                    task: self.name.to_string(),
                    source,
                }
            })?;

        let thread = handle.thread().clone();
        let aborted = {
            let mut state = self.monitor.lock();
            state.thread = Some(thread.clone());
            state.aborted
        };
        // An abort that raced the spawn found no thread to unpark
        if aborted {
            thread.unpark();
        }
        self.handle = Some(handle);
        tracing::debug!(task = %self.name, thread = %self.thread_name, "background task started");
        Ok(())
    }

    /// Block until `stage` is published and return a copy of its value
    ///
    /// # Errors
    ///
    /// [`StageError::Failed`] carries the kind and message of the body's
    /// failure if it stopped before publishing; the owned error is still
    /// returned by `finish_up`.
    pub fn wait_for<V: Clone + 'static>(
        &self,
        stage: Stage<V>,
    ) -> std::result::Result<V, StageError> {
        let state = self.monitor.wait_stage(stage.name(), None)?;
        clone_stage(state.stages.get(stage.name()), stage)
    }

    /// Like [`wait_for`](Self::wait_for), giving up after `timeout`
    pub fn wait_for_timeout<V: Clone + 'static>(
        &self,
        stage: Stage<V>,
        timeout: Duration,
    ) -> std::result::Result<V, StageError> {
        let state = self.monitor.wait_stage(stage.name(), Some(timeout))?;
        clone_stage(state.stages.get(stage.name()), stage)
    }

    /// Block until `stage` is published and move its value out
    ///
    /// Later accessors for the same stage get [`StageError::AlreadyTaken`].
    pub fn take_stage<V: 'static>(&self, stage: Stage<V>) -> std::result::Result<V, StageError> {
        let mut state = self.monitor.wait_stage(stage.name(), None)?;
        let slot = state.stages.insert(stage.name(), StageSlot::Taken);
        match slot {
            Some(StageSlot::Ready(value)) => match value.downcast::<V>() {
                Ok(value) => Ok(*value),
                Err(value) => {
                    state.stages.insert(stage.name(), StageSlot::Ready(value));
                    Err(StageError::TypeMismatch {
                        stage: stage.name(),
                    })
                }
            },
            Some(StageSlot::Taken) => Err(StageError::AlreadyTaken {
                stage: stage.name(),
            }),
            None => {
                state.stages.remove(stage.name());
                Err(StageError::NotReached {
                    stage: stage.name(),
                })
            }
        }
    }

    /// Block until the body has stopped and return the phase it ended in
    pub fn wait_finished(&self) -> Phase {
        self.monitor.wait_finished(None)
    }

    /// Join the thread and return the body's value
    ///
    /// # Errors
    ///
    /// - [`TaskError::Failed`] with the body's own error if it classifies as
    ///   transient or authentication
    /// - [`TaskError::Cancelled`] if it classifies as cancelled
    /// - [`TaskError::Unexpected`] wrapping any other error
    /// - [`TaskError::Panicked`] if the body panicked
    /// - [`TaskError::NotStarted`] if [`start`](Self::start) never succeeded
    pub fn finish_up(mut self) -> std::result::Result<T, TaskError<E>> {
        let Some(handle) = self.handle.take() else {
            return Err(TaskError::NotStarted {
                task: self.name.to_string(),
            });
        };
        // The body runs under catch_unwind, so join only fails if that
        // machinery itself unwound
        let outcome = handle.join().unwrap_or_else(Err);
        self.monitor.set_phase(Phase::Joined);
        tracing::debug!(task = %self.name, "background task joined");
        self.rethrow(outcome)
    }

    /// Like [`finish_up`](Self::finish_up), bounded by `timeout`
    ///
    /// If the body is still running when the bound expires it is aborted, the
    /// thread is detached, and [`TaskError::TimedOut`] is returned.
    pub fn finish_up_timeout(
        mut self,
        timeout: Duration,
    ) -> std::result::Result<T, TaskError<E>> {
        if self.handle.is_none() {
            return Err(TaskError::NotStarted {
                task: self.name.to_string(),
            });
        }
        if !self.monitor.wait_finished(Some(timeout)).is_finished() {
            self.abort();
            self.handle.take();
            tracing::warn!(task = %self.name, ?timeout, "task did not finish in time, detaching thread");
            return Err(TaskError::TimedOut {
                task: self.name.to_string(),
                after: timeout,
            });
        }
        self.finish_up()
    }

    /// [`finish_up`](Self::finish_up) from async code
    ///
    /// The join runs on tokio's blocking pool so the runtime is not stalled.
    pub async fn finish_up_async(self) -> std::result::Result<T, TaskError<E>> {
        let task = self.name.to_string();
        match tokio::task::spawn_blocking(move || self.finish_up()).await {
            Ok(result) => result,
            Err(e) => Err(TaskError::Panicked {
                task,
                message: e.to_string(),
            }),
        }
    }

    fn rethrow(&self, outcome: Outcome<T, E>) -> std::result::Result<T, TaskError<E>> {
        let task = self.name.to_string();
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(match e.failure_kind() {
                FailureKind::Transient | FailureKind::Authentication => TaskError::Failed(e),
                FailureKind::Cancelled => TaskError::Cancelled { task },
                FailureKind::Unexpected => TaskError::Unexpected {
                    task,
                    source: Box::new(e),
                },
            }),
            Err(payload) => Err(TaskError::Panicked {
                task,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl<T, E> GuardedTask<T, E> {
    /// Request cancellation
    ///
    /// Cancels the context token, wakes `ctx.sleep`, aborts every linked
    /// channel, and unparks the thread. Idempotent and safe from any thread.
    pub fn abort(&self) {
        let Some((linked, thread)) = self.monitor.request_abort() else {
            return;
        };
        tracing::debug!(task = %self.name, linked = linked.len(), "abort requested");
        for target in linked {
            target.abort();
        }
        if let Some(thread) = thread {
            thread.unpark();
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.monitor.lock().phase
    }

    /// Whether abort has been requested
    pub fn is_aborted(&self) -> bool {
        self.monitor.token.is_cancelled()
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> TaskStatus {
        let state = self.monitor.lock();
        TaskStatus {
            name: self.name.to_string(),
            phase: state.phase,
            aborted: state.aborted,
        }
    }
}

impl<T, E> fmt::Debug for GuardedTask<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedTask")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl<T, E> Drop for GuardedTask<T, E> {
    fn drop(&mut self) {
        if self.handle.take().is_none() {
            return;
        }
        if self.phase().is_finished() {
            tracing::debug!(task = %self.name, "finished task dropped without finish_up");
            return;
        }
        self.abort();
        tracing::warn!(task = %self.name, "task dropped without finish_up, aborted and detached");
    }
}

fn run_body<T, E>(ctx: TaskContext, body: Body<T, E>) -> Outcome<T, E>
where
    E: std::error::Error + Classify,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));
    let (phase, failure) = match &outcome {
        Ok(Ok(_)) => (Phase::ResultReady, None),
        Ok(Err(e)) => (Phase::Failed, Some((e.failure_kind(), e.to_string()))),
        Err(payload) => (
            Phase::Failed,
            Some((FailureKind::Unexpected, panic_message(payload.as_ref()))),
        ),
    };
    tracing::debug!(task = ctx.name(), ?phase, "background call finished");
    ctx.monitor().finish(phase, failure);
    outcome
}

fn clone_stage<V: Clone + 'static>(
    slot: Option<&StageSlot>,
    stage: Stage<V>,
) -> std::result::Result<V, StageError> {
    let name = stage.name();
    match slot {
        Some(StageSlot::Ready(value)) => value
            .downcast_ref::<V>()
            .cloned()
            .ok_or(StageError::TypeMismatch { stage: name }),
        Some(StageSlot::Taken) => Err(StageError::AlreadyTaken { stage: name }),
        None => Err(StageError::NotReached { stage: name }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
