//! Batching strategies.
//!
//! A strategy is plain configuration. The accumulator asks it whether the
//! pending batch is full, and the writer asks it which syscall path the
//! batch takes at flush time.

use std::num::NonZeroUsize;

use bytes::Bytes;

use crate::socket::DatagramSocket;

/// Largest UDP payload (65535 - 8 byte UDP header - 20 byte IPv4 header).
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Hard cap of a bounded counted batch (kernel `UIO_MAXIOV`).
pub const MAX_COUNTED_BATCH: usize = 1024;

/// Hard cap of an unbounded batch. Writes beyond it are rejected.
pub const UNBOUNDED_BATCH_CAP: usize = 8192;

/// Kernel limit on segments per `UDP_SEGMENT` send.
pub const MAX_GSO_SEGMENTS: usize = 64;

/// Segment count used by the GSO batching modes.
pub const DEFAULT_GSO_BATCH: usize = 16;

/// Auto-flush threshold of a counted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    /// Flush after this many datagrams (capped at [`MAX_COUNTED_BATCH`]).
    Bounded(NonZeroUsize),
    /// Never auto-flush; the caller drives every flush.
    Unbounded,
}

/// How pending datagrams are turned into syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchStrategy {
    /// Every write is flushed on its own.
    #[default]
    Immediate,
    /// Accumulate up to a count, then one `sendmmsg` for the lot.
    Counted { limit: BatchLimit },
    /// Accumulate, then coalesce equally sized runs into GSO sends.
    Segmented { max_segments: usize, max_bytes: usize },
}

/// Syscall path a flush takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPath {
    /// One `send_to` per datagram.
    Single,
    /// One `send_batch` call for the whole batch.
    Batch,
    /// One `send_segments` call per segment run.
    Segments,
}

impl BatchStrategy {
    pub fn counted(limit: usize) -> Self {
        match NonZeroUsize::new(limit.min(MAX_COUNTED_BATCH)) {
            Some(n) => Self::Counted {
                limit: BatchLimit::Bounded(n),
            },
            None => Self::Immediate,
        }
    }

    pub fn unbounded() -> Self {
        Self::Counted {
            limit: BatchLimit::Unbounded,
        }
    }

    /// Segment ceiling clamped to `1..=MAX_GSO_SEGMENTS`, byte ceiling to
    /// `1..=MAX_DATAGRAM_SIZE`.
    pub fn segmented(max_segments: usize, max_bytes: usize) -> Self {
        Self::Segmented {
            max_segments: max_segments.clamp(1, MAX_GSO_SEGMENTS),
            max_bytes: max_bytes.clamp(1, MAX_DATAGRAM_SIZE),
        }
    }

    /// Adjust to what `socket` can do: segmentation without kernel offload
    /// degrades to a counted batch of the same size.
    pub fn for_socket<S: DatagramSocket + ?Sized>(self, socket: &S) -> Self {
        match self {
            Self::Segmented { max_segments, .. } if !socket.segmentation_offload() => {
                trace_debug!("segmentation offload unavailable, falling back to counted batch");
                Self::counted(max_segments)
            }
            other => other,
        }
    }

    /// Most datagrams a batch may hold before it must be flushed.
    #[inline]
    pub fn max_datagrams(&self) -> usize {
        match self {
            Self::Immediate => 1,
            Self::Counted {
                limit: BatchLimit::Bounded(n),
            } => n.get(),
            Self::Counted {
                limit: BatchLimit::Unbounded,
            } => UNBOUNDED_BATCH_CAP,
            Self::Segmented { max_segments, .. } => *max_segments,
        }
    }

    /// Byte ceiling of one batch, if the strategy has one.
    #[inline]
    pub fn max_bytes(&self) -> Option<usize> {
        match self {
            Self::Segmented { max_bytes, .. } => Some(*max_bytes),
            _ => None,
        }
    }

    /// Whether a batch of `count` datagrams totalling `bytes` must flush.
    #[inline]
    pub fn is_full(&self, count: usize, bytes: usize) -> bool {
        match self {
            Self::Immediate => count >= 1,
            Self::Counted {
                limit: BatchLimit::Bounded(n),
            } => count >= n.get(),
            Self::Counted {
                limit: BatchLimit::Unbounded,
            } => false,
            Self::Segmented {
                max_segments,
                max_bytes,
            } => count >= *max_segments || bytes >= *max_bytes,
        }
    }

    /// Whether appending `next_len` bytes would breach the byte ceiling.
    #[inline]
    pub fn would_overflow(&self, bytes: usize, next_len: usize) -> bool {
        match self.max_bytes() {
            Some(max) => bytes + next_len > max,
            None => false,
        }
    }

    #[inline]
    pub fn flush_path(&self) -> FlushPath {
        match self {
            Self::Immediate => FlushPath::Single,
            Self::Counted { .. } => FlushPath::Batch,
            Self::Segmented { .. } => FlushPath::Segments,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(
            self,
            Self::Counted {
                limit: BatchLimit::Unbounded
            }
        )
    }
}

/// A run of datagrams the kernel can split from one buffer: every segment
/// has `segment_size` bytes except possibly the last, which is shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRun {
    pub start: usize,
    pub len: usize,
    pub segment_size: usize,
}

impl SegmentRun {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Split `packets` into GSO runs honoring the segment and byte ceilings.
pub fn plan_segments(packets: &[Bytes], max_segments: usize, max_bytes: usize) -> Vec<SegmentRun> {
    let max_segments = max_segments.max(1);
    let mut runs = Vec::new();
    let mut i = 0;

    while i < packets.len() {
        let segment_size = packets[i].len();
        let mut len = 1;
        let mut bytes = segment_size;

        while i + len < packets.len() && len < max_segments {
            let next = packets[i + len].len();
            if next > segment_size || bytes + next > max_bytes {
                break;
            }
            len += 1;
            bytes += next;
            if next < segment_size {
                // short segment terminates the run
                break;
            }
        }

        runs.push(SegmentRun {
            start: i,
            len,
            segment_size,
        });
        i += len;
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkts(sizes: &[usize]) -> Vec<Bytes> {
        sizes.iter().map(|&n| Bytes::from(vec![0u8; n])).collect()
    }

    #[test]
    fn test_immediate_is_always_full() {
        let s = BatchStrategy::Immediate;
        assert!(!s.is_full(0, 0));
        assert!(s.is_full(1, 4));
        assert_eq!(s.flush_path(), FlushPath::Single);
    }

    #[test]
    fn test_counted_full_at_limit() {
        let s = BatchStrategy::counted(10);
        assert!(!s.is_full(9, 900));
        assert!(s.is_full(10, 1000));
        assert_eq!(s.max_datagrams(), 10);
    }

    #[test]
    fn test_counted_clamped_to_hard_cap() {
        let s = BatchStrategy::counted(1_000_000);
        assert_eq!(s.max_datagrams(), MAX_COUNTED_BATCH);
        assert!(s.is_full(MAX_COUNTED_BATCH, 0));
    }

    #[test]
    fn test_counted_zero_is_immediate() {
        assert_eq!(BatchStrategy::counted(0), BatchStrategy::Immediate);
    }

    #[test]
    fn test_unbounded_never_full() {
        let s = BatchStrategy::unbounded();
        assert!(s.is_unbounded());
        assert!(!s.is_full(UNBOUNDED_BATCH_CAP * 2, usize::MAX));
        assert_eq!(s.max_datagrams(), UNBOUNDED_BATCH_CAP);
    }

    #[test]
    fn test_segmented_ceilings() {
        let s = BatchStrategy::segmented(1000, 1_000_000);
        assert_eq!(
            s,
            BatchStrategy::Segmented {
                max_segments: MAX_GSO_SEGMENTS,
                max_bytes: MAX_DATAGRAM_SIZE
            }
        );

        let s = BatchStrategy::segmented(4, 3000);
        assert!(s.is_full(4, 100));
        assert!(s.is_full(2, 3000));
        assert!(!s.is_full(3, 2999));
        assert!(s.would_overflow(2500, 501));
        assert!(!s.would_overflow(2500, 500));
    }

    #[test]
    fn test_plan_uniform_sizes() {
        let runs = plan_segments(&pkts(&[1200; 5]), 16, MAX_DATAGRAM_SIZE);
        assert_eq!(
            runs,
            vec![SegmentRun {
                start: 0,
                len: 5,
                segment_size: 1200
            }]
        );
    }

    #[test]
    fn test_plan_short_tail_closes_run() {
        let runs = plan_segments(&pkts(&[1200, 1200, 800, 1200]), 16, MAX_DATAGRAM_SIZE);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].range(), 0..3);
        assert_eq!(runs[1].range(), 3..4);
    }

    #[test]
    fn test_plan_larger_packet_starts_new_run() {
        let runs = plan_segments(&pkts(&[500, 500, 1200, 1200]), 16, MAX_DATAGRAM_SIZE);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].segment_size, 500);
        assert_eq!(runs[1].segment_size, 1200);
        assert_eq!(runs[1].range(), 2..4);
    }

    #[test]
    fn test_plan_respects_segment_and_byte_ceilings() {
        let runs = plan_segments(&pkts(&[100; 10]), 4, MAX_DATAGRAM_SIZE);
        let lens: Vec<usize> = runs.iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![4, 4, 2]);

        let runs = plan_segments(&pkts(&[1000; 5]), 64, 2500);
        let lens: Vec<usize> = runs.iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![2, 2, 1]);
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan_segments(&[], 16, MAX_DATAGRAM_SIZE).is_empty());
    }
}
