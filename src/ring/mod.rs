//! Fixed-capacity circular byte channel between one producer and one consumer thread.
//!
//! The producer pushes bytes and blocks while the ring is full; the consumer
//! pulls and blocks while it is empty. Either side can end the exchange:
//! the producer with [`RingByteChannel::signal_end`] or
//! [`RingByteChannel::signal_failure`], the consumer with
//! [`RingByteChannel::abort`].
//!
//! # Example
//!
//! ```
//! use handoff::ring::RingByteChannel;
//! use std::io::Read;
//!
//! let (mut sink, mut source) = RingByteChannel::pair(8).unwrap();
//! let producer = std::thread::spawn(move || {
//!     sink.push_all(b"document body").unwrap();
//!     sink.finish();
//! });
//!
//! let mut body = String::new();
//! source.read_to_string(&mut body).unwrap();
//! producer.join().unwrap();
//! assert_eq!(body, "document body");
//! ```

use crate::config::{BridgeConfig, validate_ring_capacity};
use crate::error::{Error, Result};
use crate::types::{Abortable, lock};
use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Upper bound for the scratch buffer used by [`ByteSink::fill_from`]
const FILL_CHUNK: usize = 8192;

/// Bounded byte channel backed by a power-of-two ring
///
/// All fields live behind one monitor. Exactly one producer and one consumer
/// may use a channel; [`RingByteChannel::pair`] enforces that through the
/// non-`Clone` [`ByteSink`] and [`ByteSource`] halves.
pub struct RingByteChannel {
    state: Mutex<RingState>,
    cond: Condvar,
    capacity: usize,
    mask: usize,
}

struct RingState {
    buffer: Box<[u8]>,
    /// Index of the oldest unread byte
    read_pos: usize,
    /// Number of unread bytes, `0 <= count <= capacity`
    count: usize,
    ended: bool,
    aborted: bool,
    /// Delivered once, when the consumer drains to empty after `ended`
    failure: Option<io::Error>,
}

impl RingByteChannel {
    /// Create a channel holding at most `capacity` bytes
    ///
    /// `capacity` must be a non-zero power of two.
    pub fn new(capacity: usize) -> Result<Self> {
        validate_ring_capacity(capacity)?;
        Ok(Self {
            state: Mutex::new(RingState {
                buffer: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                count: 0,
                ended: false,
                aborted: false,
                failure: None,
            }),
            cond: Condvar::new(),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Create a channel sized by [`BridgeConfig::ring_capacity`]
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Self::new(config.ring_capacity)
    }

    /// Create a channel and split it into its producer and consumer halves
    pub fn pair(capacity: usize) -> Result<(ByteSink, ByteSource)> {
        let channel = Arc::new(Self::new(capacity)?);
        Ok((
            ByteSink::new(Arc::clone(&channel)),
            ByteSource::new(channel),
        ))
    }

    /// Fixed byte capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered, unread bytes
    pub fn len(&self) -> usize {
        lock(&self.state).count
    }

    /// Whether no bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the producer has signalled end (or failure)
    pub fn is_ended(&self) -> bool {
        lock(&self.state).ended
    }

    /// Whether the consumer has aborted
    pub fn is_aborted(&self) -> bool {
        lock(&self.state).aborted
    }

    /// Copy bytes into the ring, blocking while it is full
    ///
    /// Copies only the contiguous run that fits before the backing array
    /// wraps, and returns how many bytes that was; callers loop for the rest
    /// (or use [`RingByteChannel::push_all`]). An empty slice is a no-op.
    ///
    /// Returns [`Error::Abandoned`] without copying once the consumer has
    /// aborted, and [`Error::AlreadyEnded`] after the producer signalled end.
    pub fn push(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }

        let mut state = lock(&self.state);
        loop {
            if state.aborted {
                return Err(Error::Abandoned);
            }
            if state.ended {
                return Err(Error::AlreadyEnded);
            }
            if state.count < self.capacity {
                break;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let write_pos = (state.read_pos + state.count) & self.mask;
        let run = bytes
            .len()
            .min(self.capacity - state.count)
            .min(self.capacity - write_pos);
        state.buffer[write_pos..write_pos + run].copy_from_slice(&bytes[..run]);
        state.count += run;
        self.cond.notify_all();
        Ok(run)
    }

    /// Push every byte of `bytes`, looping over [`RingByteChannel::push`]
    pub fn push_all(&self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let n = self.push(bytes)?;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Copy buffered bytes out, blocking while the ring is empty and not ended
    ///
    /// Returns `Some(n)` with `n` bytes copied (the contiguous run bounded by
    /// wraparound), `Some(0)` immediately for an empty `buf`, and `None` once
    /// everything has been drained after end. If the producer signalled a
    /// failure, the drain to empty raises that failure once instead of `None`.
    pub fn pull(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }

        let mut state = lock(&self.state);
        loop {
            if state.count > 0 {
                let start = state.read_pos;
                let run = buf
                    .len()
                    .min(state.count)
                    .min(self.capacity - start);
                buf[..run].copy_from_slice(&state.buffer[start..start + run]);
                state.read_pos = (start + run) & self.mask;
                state.count -= run;
                self.cond.notify_all();
                return Ok(Some(run));
            }
            if state.ended {
                return match state.failure.take() {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }
            if state.aborted {
                return Ok(None);
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Producer side: no more bytes will be pushed
    pub fn signal_end(&self) {
        let mut state = lock(&self.state);
        if !state.ended {
            state.ended = true;
            tracing::trace!(buffered = state.count, "ring channel ended");
        }
        self.cond.notify_all();
    }

    /// Producer side: end the stream with an error
    ///
    /// The consumer still receives every byte pushed before this call; the
    /// error replaces end-of-data on the drain to empty. Ignored if the
    /// stream already ended or the consumer aborted.
    pub fn signal_failure(&self, err: io::Error) {
        let mut state = lock(&self.state);
        if !state.ended && !state.aborted {
            tracing::trace!(buffered = state.count, error = %err, "ring channel failed");
            state.failure = Some(err);
            state.ended = true;
        }
        self.cond.notify_all();
    }

    /// Consumer side: stop wanting data
    ///
    /// Wakes a producer blocked on a full ring so it can unwind. Idempotent,
    /// and a no-op once the producer has ended.
    pub fn abort(&self) {
        let mut state = lock(&self.state);
        if state.ended || state.aborted {
            return;
        }
        state.aborted = true;
        tracing::trace!(buffered = state.count, "ring channel aborted");
        self.cond.notify_all();
    }
}

impl Abortable for RingByteChannel {
    fn abort(&self) {
        RingByteChannel::abort(self);
    }
}

impl fmt::Debug for RingByteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("RingByteChannel")
            .field("capacity", &self.capacity)
            .field("count", &state.count)
            .field("ended", &state.ended)
            .field("aborted", &state.aborted)
            .finish()
    }
}

/// Producer half of a [`RingByteChannel`]
///
/// Dropping a sink that never called [`ByteSink::finish`] or
/// [`ByteSink::fail`] records an `UnexpectedEof` failure, so a producer that
/// unwinds early never looks like a complete stream to the consumer.
#[derive(Debug)]
pub struct ByteSink {
    channel: Arc<RingByteChannel>,
    finished: bool,
}

impl ByteSink {
    fn new(channel: Arc<RingByteChannel>) -> Self {
        Self {
            channel,
            finished: false,
        }
    }

    /// See [`RingByteChannel::push`]
    pub fn push(&mut self, bytes: &[u8]) -> Result<usize> {
        self.channel.push(bytes)
    }

    /// See [`RingByteChannel::push_all`]
    pub fn push_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.channel.push_all(bytes)
    }

    /// Copy a blocking reader into the channel until it reports EOF
    ///
    /// Returns the number of bytes transferred. Stops with
    /// [`Error::Abandoned`] when the consumer aborts and with [`Error::Io`] on
    /// a read error; the channel is left open in both cases so the caller
    /// decides between [`ByteSink::finish`] and [`ByteSink::fail`].
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> Result<u64> {
        let mut scratch = vec![0u8; self.channel.capacity().min(FILL_CHUNK)];
        let mut total = 0u64;
        loop {
            if self.channel.is_aborted() {
                return Err(Error::Abandoned);
            }
            let n = match reader.read(&mut scratch) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };
            self.channel.push_all(&scratch[..n])?;
            total += n as u64;
        }
    }

    /// Whether the consumer has aborted
    pub fn is_aborted(&self) -> bool {
        self.channel.is_aborted()
    }

    /// Fixed byte capacity of the underlying ring
    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    /// Handle a task can abort on the consumer's behalf
    pub fn abort_handle(&self) -> Arc<dyn Abortable> {
        Arc::clone(&self.channel) as Arc<dyn Abortable>
    }

    /// Signal natural end of data
    pub fn finish(mut self) {
        self.finished = true;
        self.channel.signal_end();
    }

    /// End the stream with an error the consumer will see after draining
    pub fn fail(mut self, err: io::Error) {
        self.finished = true;
        self.channel.signal_failure(err);
    }
}

impl Drop for ByteSink {
    fn drop(&mut self) {
        if !self.finished {
            self.channel.signal_failure(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "producer dropped without signalling end",
            ));
        }
    }
}

/// Consumer half of a [`RingByteChannel`]
///
/// Implements [`Read`], so downstream code can treat it as any other byte
/// stream. Dropping it aborts the channel.
#[derive(Debug)]
pub struct ByteSource {
    channel: Arc<RingByteChannel>,
}

impl ByteSource {
    fn new(channel: Arc<RingByteChannel>) -> Self {
        Self { channel }
    }

    /// See [`RingByteChannel::pull`]
    pub fn pull(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.channel.pull(buf)
    }

    /// Number of bytes that can be read without blocking
    pub fn available(&self) -> usize {
        self.channel.len()
    }

    /// Abort the channel and release the consumer half
    pub fn close(self) {
        // Drop aborts
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.channel.pull(buf)?.unwrap_or(0))
    }
}

impl Drop for ByteSource {
    fn drop(&mut self) {
        self.channel.abort();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
