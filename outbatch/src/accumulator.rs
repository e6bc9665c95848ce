//! Pending datagram storage.
//!
//! Pure bookkeeping: no I/O, no addresses. The strategy decides when the
//! batch is full; the accumulator only enforces per-datagram validity and
//! the hard capacity.

use bytes::Bytes;

use crate::error::{BatchError, Result};
use crate::strategy::{BatchStrategy, MAX_DATAGRAM_SIZE};

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The strategy's `is_full` evaluated after the append.
    pub should_flush_now: bool,
}

pub struct Accumulator {
    strategy: BatchStrategy,
    packets: Vec<Bytes>,
    bytes: usize,
}

impl Accumulator {
    pub fn new(strategy: BatchStrategy) -> Self {
        // Unbounded batches grow on demand instead of reserving the hard cap.
        let reserve = if strategy.is_unbounded() {
            64
        } else {
            strategy.max_datagrams()
        };
        Self {
            strategy,
            packets: Vec::with_capacity(reserve),
            bytes: 0,
        }
    }

    #[inline]
    pub fn strategy(&self) -> BatchStrategy {
        self.strategy
    }

    /// Validate `buf[..len]` and queue it. On error nothing changes.
    pub fn append(&mut self, mut buf: Bytes, len: usize) -> Result<AppendOutcome> {
        self.validate(&buf, len)?;

        let cap = self.strategy.max_datagrams();
        if self.packets.len() >= cap {
            return Err(BatchError::BacklogFull { cap });
        }

        buf.truncate(len);
        self.bytes += len;
        self.packets.push(buf);

        Ok(AppendOutcome {
            should_flush_now: self.strategy.is_full(self.packets.len(), self.bytes),
        })
    }

    /// Caller-contract checks. A segmented batch also refuses a datagram
    /// larger than its byte ceiling, so no run can exceed it.
    pub fn validate(&self, buf: &Bytes, len: usize) -> Result<()> {
        if len == 0 {
            return Err(BatchError::EmptyDatagram);
        }
        if len > buf.len() {
            return Err(BatchError::LengthOutOfBounds {
                len,
                available: buf.len(),
            });
        }
        let max = self
            .strategy
            .max_bytes()
            .map_or(MAX_DATAGRAM_SIZE, |ceiling| ceiling.min(MAX_DATAGRAM_SIZE));
        if len > max {
            return Err(BatchError::Oversize { len, max });
        }
        Ok(())
    }

    /// The pending batch must be flushed before `len` more bytes fit.
    #[inline]
    pub fn needs_flush_before(&self, len: usize) -> bool {
        !self.packets.is_empty() && self.strategy.would_overflow(self.bytes, len)
    }

    /// Drain everything, in append order.
    pub fn take_all(&mut self) -> Vec<Bytes> {
        self.bytes = 0;
        std::mem::replace(
            &mut self.packets,
            Vec::with_capacity(self.strategy.max_datagrams().min(64)),
        )
    }

    pub fn reset(&mut self) {
        self.packets.clear();
        self.bytes = 0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.bytes
    }

    /// Pending datagrams in append order.
    pub fn packets(&self) -> &[Bytes] {
        &self.packets
    }
}
