//! Write-style adapter over a ring channel's producer half.
//!
//! Lets code that serializes into an arbitrary [`Write`] sink feed a
//! [`RingByteChannel`](crate::ring::RingByteChannel), so the consumer sees the
//! same pull-style stream whichever way the producer was written.

use crate::error::Error;
use crate::ring::ByteSink;
use crate::types::Abortable;
use std::io::{self, Write};
use std::sync::Arc;

/// [`Write`] surface forwarding straight into a [`ByteSink`]
///
/// Adds no buffering beyond the one-byte scratch slot used by
/// [`StreamBridge::write_byte`]. Once the consumer aborts, writes fail with
/// [`io::ErrorKind::BrokenPipe`] so serializers stop early.
#[derive(Debug)]
pub struct StreamBridge {
    sink: ByteSink,
    scratch: [u8; 1],
    refused: bool,
}

impl StreamBridge {
    /// Wrap the producer half of a channel
    pub fn new(sink: ByteSink) -> Self {
        Self {
            sink,
            scratch: [0u8; 1],
            refused: false,
        }
    }

    /// Write a single byte, blocking until it fits
    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.scratch[0] = byte;
        // A non-empty push blocks until at least one byte is copied
        match self.sink.push(&self.scratch) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.write_failed(e)),
        }
    }

    /// Whether the consumer has aborted
    pub fn is_aborted(&self) -> bool {
        self.sink.is_aborted()
    }

    /// Whether a write was turned away because the consumer had aborted
    pub fn was_refused(&self) -> bool {
        self.refused
    }

    /// Handle a task can abort on the consumer's behalf
    pub fn abort_handle(&self) -> Arc<dyn Abortable> {
        self.sink.abort_handle()
    }

    /// Signal natural end of data
    pub fn close(self) {
        self.sink.finish();
    }

    /// End the stream with an error the consumer will see after draining
    pub fn fail(self, err: io::Error) {
        self.sink.fail(err);
    }

    fn write_failed(&mut self, err: Error) -> io::Error {
        if matches!(err, Error::Abandoned) {
            self.refused = true;
        }
        into_io(err)
    }
}

impl Write for StreamBridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sink.push(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.write_failed(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn into_io(err: Error) -> io::Error {
    match err {
        Error::Abandoned => io::Error::new(io::ErrorKind::BrokenPipe, err),
        Error::Io(e) => e,
        other => io::Error::other(other),
    }
}
