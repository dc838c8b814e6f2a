//! Core types shared by the channels and the task wrapper

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle phase of a [`GuardedTask`](crate::task::GuardedTask)
///
/// `NotStarted → Running → (ResultReady | Failed) → Joined`. The two terminal
/// outcomes are mutually exclusive and set at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Constructed, thread not yet spawned
    NotStarted,
    /// Body executing on the background thread
    Running,
    /// Body returned successfully
    ResultReady,
    /// Body returned an error or panicked
    Failed,
    /// Thread joined and outcome handed to the initiator
    Joined,
}

impl Phase {
    /// Whether the body has stopped executing
    pub fn is_finished(self) -> bool {
        matches!(self, Phase::ResultReady | Phase::Failed | Phase::Joined)
    }
}

/// Point-in-time view of a task, suitable for status reporting
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task name
    pub name: String,
    /// Current phase
    pub phase: Phase,
    /// Whether abort has been requested
    pub aborted: bool,
}

/// Consumer-side cancellation of a bounded channel
///
/// Implemented by [`RingByteChannel`](crate::ring::RingByteChannel) (abort) and
/// [`HandoffQueue`](crate::queue::HandoffQueue) (abandon). A task aborts every
/// target linked through [`TaskContext::link`](crate::task::TaskContext::link)
/// so a producer blocked on a full buffer wakes up.
pub trait Abortable: Send + Sync {
    /// Tell the producer to stop; idempotent
    fn abort(&self);
}

/// Lock a monitor, recovering the guard if a holder panicked
///
/// Every monitor in this crate keeps its invariants across each critical
/// section, so a poisoned lock still guards consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
