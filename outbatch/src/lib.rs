//! # outbatch
//!
//! Outbound datagram batching for a UDP transport.
//!
//! ## Features
//!
//! - **Strategies**: immediate, counted (`sendmmsg`), segmented (UDP GSO)
//! - **Happy eyeballs**: writes a racing connection's active paths from one batch
//! - **Exact accounting**: a datagram counts as sent once, after the socket takes it
//! - **Pluggable sockets**: anything implementing [`DatagramSocket`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use outbatch::{BatchConfig, BatchWriter, BatchingMode, UdpBatchSocket};
//!
//! let strategy = BatchConfig::new(BatchingMode::Sendmmsg)
//!     .with_max_batch_size(32)
//!     .strategy()
//!     .unwrap();
//! let mut socket = UdpBatchSocket::bind("0.0.0.0:0").unwrap();
//! let mut writer = BatchWriter::new(strategy, &mut socket, "10.0.0.2:443".parse().unwrap());
//!
//! writer.write(Bytes::from_static(b"datagram"), 8).unwrap();
//! writer.flush().unwrap();
//! ```
//!
//! ## Failure model
//!
//! - Bad buffers are rejected before anything is queued
//! - A failed flush discards its batch; the caller retransmits at its own layer
//! - Stats sinks are best-effort and never fail a write

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => {} }

mod accumulator;
pub mod config;
mod error;
#[cfg(target_os = "linux")]
mod gso;
pub mod happy_eyeballs;
#[cfg(target_os = "linux")]
mod sendmmsg;
mod socket;
pub mod stats;
pub mod strategy;
mod writer;

pub use accumulator::{Accumulator, AppendOutcome};
pub use config::{BatchConfig, BatchingMode, DEFAULT_MAX_BATCH_SIZE};
pub use error::{BatchError, ConfigError, FlushError, Result, StatsError};
pub use happy_eyeballs::{Destinations, HappyEyeballs, PathId};
pub use socket::{DatagramSocket, UdpBatchSocket};
pub use stats::{BatchCounters, CountersSnapshot, StatsSink};
pub use strategy::{
    plan_segments, BatchLimit, BatchStrategy, FlushPath, SegmentRun, DEFAULT_GSO_BATCH,
    MAX_COUNTED_BATCH, MAX_DATAGRAM_SIZE, MAX_GSO_SEGMENTS, UNBOUNDED_BATCH_CAP,
};
pub use writer::{BatchWriter, FlushReport, PathOutcome};
