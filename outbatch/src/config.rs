//! Batching configuration.
//!
//! The transport's settings layer hands us a mode and a batch size; this
//! module turns them into a [`BatchStrategy`].

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::strategy::{BatchStrategy, DEFAULT_GSO_BATCH, MAX_DATAGRAM_SIZE};

/// Default `max_batch_size`.
pub const DEFAULT_MAX_BATCH_SIZE: usize = DEFAULT_GSO_BATCH;

/// Batching mode as configured by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum BatchingMode {
    /// One syscall per datagram.
    #[default]
    None = 0,
    /// Segmentation offload.
    Gso = 1,
    /// `sendmmsg` batches.
    Sendmmsg = 2,
    /// Segmentation offload; runs share a flush.
    SendmmsgGso = 3,
}

impl BatchingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchingMode::None => "none",
            BatchingMode::Gso => "gso",
            BatchingMode::Sendmmsg => "sendmmsg",
            BatchingMode::SendmmsgGso => "sendmmsg_gso",
        }
    }
}

impl fmt::Display for BatchingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(BatchingMode::None),
            "gso" => Ok(BatchingMode::Gso),
            "sendmmsg" => Ok(BatchingMode::Sendmmsg),
            "sendmmsg_gso" | "sendmmsg-gso" => Ok(BatchingMode::SendmmsgGso),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl TryFrom<u32> for BatchingMode {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BatchingMode::None),
            1 => Ok(BatchingMode::Gso),
            2 => Ok(BatchingMode::Sendmmsg),
            3 => Ok(BatchingMode::SendmmsgGso),
            v => Err(ConfigError::UnknownModeValue(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub mode: BatchingMode,
    /// Datagrams per batch (`Sendmmsg`) or segments per batch (GSO modes).
    pub max_batch_size: usize,
    /// `false` leaves every flush to the caller (`Sendmmsg` only).
    pub auto_flush: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: BatchingMode::None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            auto_flush: true,
        }
    }
}

impl BatchConfig {
    pub fn new(mode: BatchingMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    #[must_use]
    pub const fn manual_flush(mut self) -> Self {
        self.auto_flush = false;
        self
    }

    /// Legacy numeric form: `1` (or `0`) sends each datagram on its own,
    /// `n > 1` batches `n` datagrams, a negative value batches without
    /// auto-flush.
    pub fn from_num_batch(num_batch: i64) -> Self {
        match num_batch {
            n if n < 0 => Self::new(BatchingMode::Sendmmsg).manual_flush(),
            0 | 1 => Self::new(BatchingMode::None).with_max_batch_size(1),
            n => Self::new(BatchingMode::Sendmmsg)
                .with_max_batch_size(usize::try_from(n).unwrap_or(usize::MAX)),
        }
    }

    pub fn strategy(&self) -> Result<BatchStrategy, ConfigError> {
        match self.mode {
            BatchingMode::None => Ok(BatchStrategy::Immediate),
            BatchingMode::Sendmmsg if !self.auto_flush => Ok(BatchStrategy::unbounded()),
            BatchingMode::Sendmmsg => match self.max_batch_size {
                0 => Err(ConfigError::ZeroBatchSize),
                n => Ok(BatchStrategy::counted(n)),
            },
            BatchingMode::Gso | BatchingMode::SendmmsgGso => match self.max_batch_size {
                0 => Err(ConfigError::ZeroBatchSize),
                n => Ok(BatchStrategy::segmented(n, MAX_DATAGRAM_SIZE)),
            },
        }
    }
}
