//! Byte stream produced by a background task.

use crate::bridge::StreamBridge;
use crate::config::BridgeConfig;
use crate::error::{Classify, Result, StageError, TaskError};
use crate::ring::{ByteSource, RingByteChannel};
use crate::task::{GuardedTask, Stage, TaskContext};
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Run `body` on a background thread and read what it writes
///
/// The body may publish stages (status, headers) before writing the payload
/// to the bridge. When it returns `Ok` the stream ends cleanly; when it
/// returns `Err` the consumer gets an [`io::Error`] of the same
/// classification once the buffered bytes are drained.
///
/// # Example
///
/// ```no_run
/// use handoff::config::BridgeConfig;
/// use handoff::pipeline::spawn_stream;
/// use std::io::{Read, Write};
///
/// let mut stream = spawn_stream("render", &BridgeConfig::default(), |_ctx, out| {
///     out.write_all(b"<doc/>")?;
///     Ok::<_, std::io::Error>(6usize)
/// })?;
/// let mut body = String::new();
/// stream.read_to_string(&mut body)?;
/// assert_eq!(stream.close()?, 6);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn spawn_stream<T, E, F>(
    name: impl Into<String>,
    config: &BridgeConfig,
    body: F,
) -> Result<TaskStream<T, E>>
where
    T: Send + 'static,
    E: std::error::Error + Classify + Send + Sync + 'static,
    F: FnOnce(&TaskContext, &mut StreamBridge) -> std::result::Result<T, E> + Send + 'static,
{
    config.validate()?;
    let (sink, source) = RingByteChannel::pair(config.ring_capacity)?;
    let consumer_left = Arc::new(AtomicBool::new(false));
    let left = Arc::clone(&consumer_left);
    let task = GuardedTask::spawn_with_config(name, config, move |ctx| {
        let mut bridge = StreamBridge::new(sink);
        ctx.link(bridge.abort_handle());
        match body(ctx, &mut bridge) {
            Ok(value) => {
                bridge.close();
                Ok(value)
            }
            Err(e) => {
                if bridge.was_refused() {
                    left.store(true, Ordering::Release);
                }
                bridge.fail(super::stream_failure(&e));
                Err(e)
            }
        }
    })?;

    Ok(TaskStream {
        source,
        task,
        join_timeout: config.join_timeout,
        consumer_left,
    })
}

/// Readable end of a stream together with the task producing it
///
/// Dropping it without [`close`](Self::close) aborts the channel and the task
/// and detaches the thread.
pub struct TaskStream<T, E> {
    // Field order matters on drop: the channel is aborted before the task
    source: ByteSource,
    task: GuardedTask<T, E>,
    join_timeout: Option<Duration>,
    /// Set by the body wrapper when a failure followed a refused write
    consumer_left: Arc<AtomicBool>,
}

impl<T, E> TaskStream<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// The producing task
    pub fn task(&self) -> &GuardedTask<T, E> {
        &self.task
    }

    /// See [`GuardedTask::wait_for`]
    pub fn wait_for<V: Clone + 'static>(
        &self,
        stage: Stage<V>,
    ) -> std::result::Result<V, StageError> {
        self.task.wait_for(stage)
    }

    /// See [`GuardedTask::take_stage`]
    pub fn take_stage<V: 'static>(&self, stage: Stage<V>) -> std::result::Result<V, StageError> {
        self.task.take_stage(stage)
    }

    /// Bytes readable without blocking
    pub fn available(&self) -> usize {
        self.source.available()
    }

    /// Stop reading, abort the producer if it is still writing, and join it
    ///
    /// A transient failure the body reports after one of its writes was
    /// refused (a broken pipe, because this side closed) becomes
    /// [`TaskError::Cancelled`]; any other failure is returned as is. Honours
    /// [`BridgeConfig::join_timeout`].
    pub fn close(self) -> std::result::Result<T, TaskError<E>> {
        let Self {
            source,
            task,
            join_timeout,
            consumer_left,
        } = self;
        if !task.phase().is_finished() {
            tracing::debug!(task = task.name(), "stream closed before producer finished");
        }
        source.close();
        task.abort();
        super::join(task, join_timeout, &consumer_left)
    }
}

impl<T, E> Read for TaskStream<T, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

impl<T, E> fmt::Debug for TaskStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStream")
            .field("task", &self.task)
            .field("available", &self.source.available())
            .finish()
    }
}
