//! Error types for outbatch.

use std::io;

use thiserror::Error;

use crate::happy_eyeballs::PathId;

pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("empty datagram")]
    EmptyDatagram,

    #[error("datagram of {len} bytes exceeds maximum of {max}")]
    Oversize { len: usize, max: usize },

    #[error("length {len} exceeds buffer of {available} bytes")]
    LengthOutOfBounds { len: usize, available: usize },

    #[error("pending batch is at capacity ({cap} datagrams), flush first")]
    BacklogFull { cap: usize },

    #[error(transparent)]
    Flush(#[from] FlushError),
}

impl BatchError {
    /// Caller-contract violations: rejected before any I/O, nothing changed.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Flush(_))
    }

    pub fn as_flush(&self) -> Option<&FlushError> {
        match self {
            Self::Flush(e) => Some(e),
            _ => None,
        }
    }
}

/// A flush that did not deliver the whole batch.
///
/// `sent` counts datagrams the kernel accepted on `path` before `source`
/// was raised. The batch is discarded regardless.
#[derive(Error, Debug)]
#[error("flush on {path} path failed after {sent} of {total} datagrams: {source}")]
pub struct FlushError {
    pub path: PathId,
    pub sent: usize,
    pub total: usize,
    #[source]
    pub source: io::Error,
}

impl FlushError {
    pub(crate) fn new(path: PathId, sent: usize, total: usize, source: io::Error) -> Self {
        Self {
            path,
            sent,
            total,
            source,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    /// Backpressure rather than a broken socket; retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self.source.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => true,
            _ => is_transient_errno(self.source.raw_os_error()),
        }
    }
}

#[cfg(unix)]
fn is_transient_errno(errno: Option<i32>) -> bool {
    matches!(errno, Some(libc::ENOBUFS) | Some(libc::EAGAIN) | Some(libc::ENOMEM))
}

#[cfg(not(unix))]
fn is_transient_errno(_: Option<i32>) -> bool {
    false
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown batching mode: {0}")]
    UnknownMode(String),

    #[error("unknown batching mode value: {0}")]
    UnknownModeValue(u32),

    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// Returned by a [`StatsSink`](crate::stats::StatsSink). Never fails a flush.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stats sink error: {0}")]
pub struct StatsError(pub String);

impl StatsError {
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
