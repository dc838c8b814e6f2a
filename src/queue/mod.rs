//! Bounded FIFO handoff of discrete items between two threads.
//!
//! Used where a background listing (directory search, bucket listing) finds
//! work units faster than the consumer can record them. A full queue blocks
//! the producer; an empty one blocks the consumer until the producer signals
//! done. The queue carries no error channel: a producer-side failure travels
//! through the owning [`GuardedTask`](crate::task::GuardedTask) and is
//! retrieved when the consumer joins it.

use crate::config::{BridgeConfig, validate_queue_max_size};
use crate::error::{AddError, Result};
use crate::types::{Abortable, lock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Bounded item queue for one producer and one consumer
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
    max_size: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    completed: bool,
    abandoned: bool,
    /// An add was turned away after abandon
    refused: bool,
}

impl<T> HandoffQueue<T> {
    /// Create a queue holding at most `max_size` items
    pub fn new(max_size: usize) -> Result<Self> {
        validate_queue_max_size(max_size)?;
        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(max_size.min(64)),
                completed: false,
                abandoned: false,
                refused: false,
            }),
            cond: Condvar::new(),
            max_size,
        })
    }

    /// Create a queue bounded by [`BridgeConfig::queue_max_size`]
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Self::new(config.queue_max_size)
    }

    /// Create a queue and split it into producer and consumer halves
    pub fn pair(max_size: usize) -> Result<(HandoffSender<T>, HandoffReceiver<T>)> {
        let queue = Arc::new(Self::new(max_size)?);
        Ok((
            HandoffSender {
                queue: Arc::clone(&queue),
            },
            HandoffReceiver { queue },
        ))
    }

    /// Maximum number of buffered items
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Whether no items are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer has abandoned the queue
    pub fn is_abandoned(&self) -> bool {
        lock(&self.state).abandoned
    }

    /// Whether an add was turned away because the consumer had abandoned
    pub fn was_refused(&self) -> bool {
        lock(&self.state).refused
    }

    /// Whether the producer has signalled done
    pub fn is_completed(&self) -> bool {
        lock(&self.state).completed
    }

    /// Enqueue an item, blocking while the queue is full
    ///
    /// Returns the item inside [`AddError::Abandoned`] without enqueuing once
    /// the consumer has abandoned the queue.
    pub fn add(&self, item: T) -> std::result::Result<(), AddError<T>> {
        let mut state = lock(&self.state);
        loop {
            if state.abandoned {
                state.refused = true;
                return Err(AddError::Abandoned(item));
            }
            if state.completed {
                return Err(AddError::Completed(item));
            }
            if state.items.len() < self.max_size {
                break;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.items.push_back(item);
        self.cond.notify_all();
        Ok(())
    }

    /// Remove the oldest item, blocking while empty and not completed
    ///
    /// Returns `None` once the queue is drained after the producer signalled
    /// done, or immediately after the consumer abandoned it.
    pub fn fetch(&self) -> Option<T> {
        let mut state = lock(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                self.cond.notify_all();
                return Some(item);
            }
            if state.completed || state.abandoned {
                return None;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Producer side: no more items will be added
    pub fn signal_done(&self) {
        let mut state = lock(&self.state);
        if !state.completed {
            state.completed = true;
            tracing::trace!(buffered = state.items.len(), "handoff queue done");
        }
        self.cond.notify_all();
    }

    /// Consumer side: stop the producer and wake it if it waits on a full queue
    ///
    /// Buffered items are discarded. Idempotent, and a no-op once the producer
    /// signalled done: the remaining items stay fetchable.
    pub fn abandon(&self) {
        let mut state = lock(&self.state);
        if state.abandoned || state.completed {
            return;
        }
        state.abandoned = true;
        let discarded = state.items.len();
        state.items.clear();
        tracing::trace!(discarded, "handoff queue abandoned");
        self.cond.notify_all();
    }
}

impl<T: Send> Abortable for HandoffQueue<T> {
    fn abort(&self) {
        self.abandon();
    }
}

impl<T> fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("HandoffQueue")
            .field("max_size", &self.max_size)
            .field("len", &state.items.len())
            .field("completed", &state.completed)
            .field("abandoned", &state.abandoned)
            .finish()
    }
}

/// Producer half of a [`HandoffQueue`]; dropping it signals done
#[derive(Debug)]
pub struct HandoffSender<T> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T> HandoffSender<T> {
    /// See [`HandoffQueue::add`]
    pub fn add(&self, item: T) -> std::result::Result<(), AddError<T>> {
        self.queue.add(item)
    }

    /// Whether the consumer has abandoned the queue
    pub fn is_abandoned(&self) -> bool {
        self.queue.is_abandoned()
    }

    /// See [`HandoffQueue::was_refused`]
    pub fn was_refused(&self) -> bool {
        self.queue.was_refused()
    }

    /// Signal done and release the producer half
    pub fn done(self) {
        // Drop signals done
    }
}

impl<T: Send + 'static> HandoffSender<T> {
    /// Handle a task can abandon on the consumer's behalf
    pub fn abort_handle(&self) -> Arc<dyn Abortable> {
        Arc::clone(&self.queue) as Arc<dyn Abortable>
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        self.queue.signal_done();
    }
}

/// Consumer half of a [`HandoffQueue`]; dropping it abandons the queue
///
/// Iterating yields items in insertion order until the producer is done.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T> HandoffReceiver<T> {
    /// See [`HandoffQueue::fetch`]
    pub fn fetch(&self) -> Option<T> {
        self.queue.fetch()
    }

    /// Number of items waiting
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no items are waiting
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Abandon the queue and release the consumer half
    pub fn abandon(self) {
        // Drop abandons
    }
}

impl<T> Iterator for HandoffReceiver<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.fetch()
    }
}

impl<T> Drop for HandoffReceiver<T> {
    fn drop(&mut self) {
        self.queue.abandon();
    }
}
