//! Item queue fed by a background task.

use crate::config::BridgeConfig;
use crate::error::{Classify, Result, TaskError};
use crate::queue::{HandoffQueue, HandoffReceiver, HandoffSender};
use crate::task::{GuardedTask, TaskContext};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Run `body` on a background thread and drain the items it adds
///
/// The sender is dropped when the body returns, which signals done. Items are
/// delivered in the order the body added them.
///
/// # Example
///
/// ```no_run
/// use handoff::config::BridgeConfig;
/// use handoff::pipeline::spawn_items;
/// use std::ops::ControlFlow;
///
/// let pipeline = spawn_items("listing", &BridgeConfig::default(), |_ctx, out| {
///     for key in ["a/1", "a/2"] {
///         if out.add(key.to_string()).is_err() {
///             break;
///         }
///     }
///     Ok::<_, std::io::Error>(2usize)
/// })?;
/// let mut seeds = Vec::new();
/// let listed = pipeline.run(|key| {
///     seeds.push(key);
///     ControlFlow::Continue(())
/// })?;
/// assert_eq!(listed, seeds.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn spawn_items<I, R, E, F>(
    name: impl Into<String>,
    config: &BridgeConfig,
    body: F,
) -> Result<ItemPipeline<I, R, E>>
where
    I: Send + 'static,
    R: Send + 'static,
    E: std::error::Error + Classify + Send + Sync + 'static,
    F: FnOnce(&TaskContext, &HandoffSender<I>) -> std::result::Result<R, E> + Send + 'static,
{
    config.validate()?;
    let (sender, receiver) = HandoffQueue::pair(config.queue_max_size)?;
    let consumer_left = Arc::new(AtomicBool::new(false));
    let left = Arc::clone(&consumer_left);
    let task = GuardedTask::spawn_with_config(name, config, move |ctx| {
        ctx.link(sender.abort_handle());
        let result = body(ctx, &sender);
        if result.is_err() && sender.was_refused() {
            left.store(true, Ordering::Release);
        }
        sender.done();
        result
    })?;

    Ok(ItemPipeline {
        receiver,
        task,
        join_timeout: config.join_timeout,
        consumer_left,
    })
}

/// Consumer end of an item queue together with the task filling it
///
/// Dropping it without [`run`](Self::run) abandons the queue, aborts the task
/// and detaches the thread.
pub struct ItemPipeline<I, R, E> {
    receiver: HandoffReceiver<I>,
    task: GuardedTask<R, E>,
    join_timeout: Option<Duration>,
    consumer_left: Arc<AtomicBool>,
}

impl<I, R, E> ItemPipeline<I, R, E>
where
    I: Send + 'static,
    R: Send + 'static,
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// The producing task
    pub fn task(&self) -> &GuardedTask<R, E> {
        &self.task
    }

    /// The consumer half, for callers that fetch items themselves
    pub fn receiver(&self) -> &HandoffReceiver<I> {
        &self.receiver
    }

    /// Split into the consumer half and the task
    pub fn into_parts(self) -> (HandoffReceiver<I>, GuardedTask<R, E>) {
        (self.receiver, self.task)
    }

    /// Feed every item to `f` in order, then join the task
    ///
    /// Returning [`ControlFlow::Break`] from `f` abandons the queue and
    /// aborts the task. A transient failure the body reports after one of its
    /// adds was refused becomes [`TaskError::Cancelled`]. Honours
    /// [`BridgeConfig::join_timeout`].
    pub fn run<F>(self, mut f: F) -> std::result::Result<R, TaskError<E>>
    where
        F: FnMut(I) -> ControlFlow<()>,
    {
        let Self {
            receiver,
            task,
            join_timeout,
            consumer_left,
        } = self;

        let mut delivered = 0usize;
        let mut stopped = false;
        while let Some(item) = receiver.fetch() {
            delivered += 1;
            if f(item).is_break() {
                stopped = true;
                break;
            }
        }

        receiver.abandon();
        if stopped {
            task.abort();
            tracing::debug!(task = task.name(), delivered, "consumer stopped early");
        }
        super::join(task, join_timeout, &consumer_left)
    }
}

impl<I, R, E> fmt::Debug for ItemPipeline<I, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemPipeline")
            .field("task", &self.task)
            .field("queued", &self.receiver.len())
            .finish()
    }
}
