//! Common test utilities for handoff integration tests
//!
//! Stand-ins for the collaborators a crawler connector talks to: a paged
//! object-store listing, a slow socket, and the connector's own error type.

#![allow(dead_code)]

use handoff::{AddError, Classify, FailureKind, Interrupted, Stage};
use std::io::{self, Read};
use std::thread;
use std::time::Duration;

/// Response status, published before the body is streamed
pub const STATUS: Stage<u16> = Stage::new("status");

/// Response headers, published before the body is streamed
pub const HEADERS: Stage<Vec<(String, String)>> = Stage::new("headers");

/// Error type shaped like a repository connector's
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Remote temporarily unavailable
    #[error("service interruption: {0}")]
    ServiceInterruption(String),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Socket-level failure
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The initiator aborted the call, or the consumer went away
    #[error("interrupted")]
    Interrupted,
}

impl Classify for ConnectorError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ConnectorError::ServiceInterruption(_) => FailureKind::Transient,
            ConnectorError::Authentication(_) => FailureKind::Authentication,
            ConnectorError::Io(e) => e.failure_kind(),
            ConnectorError::Interrupted => FailureKind::Cancelled,
        }
    }
}

impl From<Interrupted> for ConnectorError {
    fn from(_: Interrupted) -> Self {
        ConnectorError::Interrupted
    }
}

impl<T> From<AddError<T>> for ConnectorError {
    fn from(_: AddError<T>) -> Self {
        ConnectorError::Interrupted
    }
}

/// Deterministic document body of `len` bytes
pub fn fake_document(id: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + ((i + id) % 26) as u8).collect()
}

/// Object keys as a paged listing would return them
pub fn listing_pages(pages: usize, per_page: usize) -> Vec<Vec<String>> {
    (0..pages)
        .map(|p| {
            (0..per_page)
                .map(|i| format!("bucket-a/docs/{:04}.html", p * per_page + i))
                .collect()
        })
        .collect()
}

/// Reader that hands out data in small chunks, like a slow socket
///
/// Optionally fails with `fail_with` once `fail_after` bytes were served.
pub struct SlowReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    delay: Duration,
    fail_after: Option<(usize, io::ErrorKind)>,
}

impl SlowReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk,
            delay: Duration::ZERO,
            fail_after: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_after(mut self, bytes: usize, kind: io::ErrorKind) -> Self {
        self.fail_after = Some((bytes, kind));
        self
    }
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some((limit, kind)) = self.fail_after {
            if self.pos >= limit {
                return Err(io::Error::new(kind, "upstream socket failed"));
            }
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let end = (self.pos + self.chunk.min(buf.len())).min(self.data.len());
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}
