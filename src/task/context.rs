//! Shared monitor and the context handed to a task body.

use super::Stage;
use crate::error::{FailureKind, Interrupted, StageError};
use crate::types::{Abortable, Phase, lock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::Thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The single monitor every accessor, the body, and `abort` synchronize on
pub(crate) struct TaskMonitor {
    pub(crate) state: Mutex<MonitorState>,
    pub(crate) cond: Condvar,
    pub(crate) token: CancellationToken,
}

pub(crate) struct MonitorState {
    pub(crate) phase: Phase,
    pub(crate) aborted: bool,
    /// Kind and message of the captured failure, for accessors
    pub(crate) failure: Option<(FailureKind, String)>,
    pub(crate) stages: HashMap<&'static str, StageSlot>,
    /// Channels to abort together with the task
    pub(crate) linked: Vec<Arc<dyn Abortable>>,
    pub(crate) thread: Option<Thread>,
}

pub(crate) enum StageSlot {
    Ready(Box<dyn Any + Send>),
    Taken,
}

impl TaskMonitor {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                phase: Phase::NotStarted,
                aborted: false,
                failure: None,
                stages: HashMap::new(),
                linked: Vec::new(),
                thread: None,
            }),
            cond: Condvar::new(),
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MonitorState> {
        lock(&self.state)
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        let mut state = self.lock();
        state.phase = phase;
        self.cond.notify_all();
    }

    /// Record the body's terminal outcome; the first call wins
    pub(crate) fn finish(&self, phase: Phase, failure: Option<(FailureKind, String)>) {
        let mut state = self.lock();
        if !state.phase.is_finished() {
            state.phase = phase;
            state.failure = failure;
        }
        self.cond.notify_all();
    }

    /// Mark aborted and hand back what must be woken outside the lock
    ///
    /// Returns `None` if abort was already requested.
    pub(crate) fn request_abort(&self) -> Option<(Vec<Arc<dyn Abortable>>, Option<Thread>)> {
        let targets = {
            let mut state = self.lock();
            if state.aborted {
                return None;
            }
            state.aborted = true;
            self.cond.notify_all();
            (std::mem::take(&mut state.linked), state.thread.clone())
        };
        self.token.cancel();
        Some(targets)
    }

    /// Block until `stage` is published or can no longer be reached
    pub(crate) fn wait_stage(
        &self,
        stage: &'static str,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'_, MonitorState>, StageError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if state.stages.contains_key(stage) {
                return Ok(state);
            }
            match state.phase {
                Phase::NotStarted => return Err(StageError::NotStarted { stage }),
                phase if phase.is_finished() => {
                    return Err(match &state.failure {
                        Some((kind, message)) => StageError::Failed {
                            stage,
                            kind: *kind,
                            message: message.clone(),
                        },
                        None => StageError::NotReached { stage },
                    });
                }
                _ => {}
            }
            state = match deadline {
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StageError::TimedOut {
                            stage,
                            after: timeout.unwrap_or_default(),
                        });
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Block until the body has stopped, or until `timeout` expires
    pub(crate) fn wait_finished(&self, timeout: Option<Duration>) -> Phase {
        let state = self.lock();
        if state.phase == Phase::NotStarted {
            return state.phase;
        }
        let state = match timeout {
            None => self
                .cond
                .wait_while(state, |s| !s.phase.is_finished())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(state, timeout, |s| !s.phase.is_finished())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        state.phase
    }
}

/// Handle given to a task body for cooperating with the initiator
///
/// Carries the cancellation signal (`is_aborted`, `checkpoint`, `sleep`, and a
/// [`CancellationToken`] for async code) and the write side of the task's
/// partial results (`publish`).
#[derive(Clone)]
pub struct TaskContext {
    monitor: Arc<TaskMonitor>,
    name: Arc<str>,
}

impl TaskContext {
    pub(crate) fn new(monitor: Arc<TaskMonitor>, name: Arc<str>) -> Self {
        Self { monitor, name }
    }

    pub(crate) fn monitor(&self) -> &TaskMonitor {
        &self.monitor
    }

    /// Name of the task this body runs under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancellation token cancelled by `abort()`
    ///
    /// Async bodies can `select!` on `token().cancelled()`.
    pub fn token(&self) -> &CancellationToken {
        &self.monitor.token
    }

    /// Whether the initiator has requested an abort
    pub fn is_aborted(&self) -> bool {
        self.monitor.token.is_cancelled()
    }

    /// Return [`Interrupted`] if the initiator has requested an abort
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_aborted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with [`Interrupted`] on abort
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let state = self.monitor.lock();
        let (state, _) = self
            .monitor
            .cond
            .wait_timeout_while(state, duration, |s| !s.aborted)
            .unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Publish a partial result and wake accessors waiting for it
    ///
    /// A stage is written at most once; later publications are ignored.
    pub fn publish<V: Send + 'static>(&self, stage: Stage<V>, value: V) {
        let mut state = self.monitor.lock();
        if state.stages.contains_key(stage.name()) {
            tracing::debug!(task = %self.name, stage = stage.name(), "stage already published");
            return;
        }
        state
            .stages
            .insert(stage.name(), StageSlot::Ready(Box::new(value)));
        self.monitor.cond.notify_all();
    }

    /// Abort `target` whenever this task is aborted
    ///
    /// If the task was already aborted, `target` is aborted immediately.
    pub fn link(&self, target: Arc<dyn Abortable>) {
        let already_aborted = {
            let mut state = self.monitor.lock();
            if !state.aborted {
                state.linked.push(Arc::clone(&target));
            }
            state.aborted
        };
        if already_aborted {
            target.abort();
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.name)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
