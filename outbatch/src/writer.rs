//! Outbound batch writer.
//!
//! Lives for one send burst of a connection. Borrows the socket(s), the
//! path selector and the stats sink; owns the pending batch and the
//! sent-packet counter.
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use outbatch::{BatchStrategy, BatchWriter, UdpBatchSocket};
//!
//! let mut socket = UdpBatchSocket::bind("0.0.0.0:0").unwrap();
//! let peer = "127.0.0.1:4433".parse().unwrap();
//! let mut writer = BatchWriter::new(BatchStrategy::counted(10), &mut socket, peer);
//!
//! for _ in 0..64 {
//!     writer.write(Bytes::from_static(b"Test"), 4).unwrap();
//! }
//! writer.flush().unwrap();
//! assert_eq!(writer.pkt_sent(), 64);
//! ```

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::accumulator::Accumulator;
use crate::error::{FlushError, Result};
use crate::happy_eyeballs::{Destinations, HappyEyeballs, PathId};
use crate::socket::DatagramSocket;
use crate::stats::StatsSink;
use crate::strategy::{plan_segments, BatchStrategy, FlushPath, SegmentRun};

/// What one path did during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOutcome {
    pub path: PathId,
    pub dest: SocketAddr,
    /// Datagrams the kernel accepted on this path.
    pub sent: usize,
    /// Socket calls issued on this path.
    pub syscalls: usize,
    pub error: Option<io::ErrorKind>,
}

impl PathOutcome {
    pub fn is_complete(&self, total: usize) -> bool {
        self.error.is_none() && self.sent == total
    }
}

/// Outcome of the latest flush attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Datagrams in the batch.
    pub packets: usize,
    pub bytes: usize,
    pub paths: Vec<PathOutcome>,
}

impl FlushReport {
    /// Most datagrams confirmed on any single path.
    pub fn confirmed(&self) -> usize {
        self.paths.iter().map(|p| p.sent).max().unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        self.paths.iter().any(|p| p.is_complete(self.packets))
    }

    pub fn path(&self, path: PathId) -> Option<&PathOutcome> {
        self.paths.iter().find(|p| p.path == path)
    }

    pub fn syscalls(&self) -> usize {
        self.paths.iter().map(|p| p.syscalls).sum()
    }
}

pub struct BatchWriter<'a, S: DatagramSocket + ?Sized> {
    accumulator: Accumulator,
    socket: &'a mut S,
    alt_socket: Option<&'a mut S>,
    peer: SocketAddr,
    paths: Option<&'a HappyEyeballs>,
    stats: Option<&'a dyn StatsSink>,
    pkt_sent: u64,
    flushes: u64,
    last_flush: Option<FlushReport>,
}

impl<'a, S: DatagramSocket + ?Sized> BatchWriter<'a, S> {
    /// `strategy` is adjusted to the socket's capabilities.
    pub fn new(strategy: BatchStrategy, socket: &'a mut S, peer: SocketAddr) -> Self {
        let strategy = strategy.for_socket(&*socket);
        Self {
            accumulator: Accumulator::new(strategy),
            socket,
            alt_socket: None,
            peer,
            paths: None,
            stats: None,
            pkt_sent: 0,
            flushes: 0,
            last_flush: None,
        }
    }

    /// Read destinations from a racing connection's selector at each flush.
    #[must_use]
    pub fn with_happy_eyeballs(mut self, paths: &'a HappyEyeballs) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Socket for the alternate path. Without one the alternate path is
    /// written through the primary socket.
    #[must_use]
    pub fn with_alternate_socket(mut self, socket: &'a mut S) -> Self {
        self.alt_socket = Some(socket);
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: &'a dyn StatsSink) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Queue `buf[..len]`, flushing if the strategy says so.
    ///
    /// Invalid buffers are rejected with nothing changed. If a flush
    /// triggered here fails, every unconfirmed datagram, including this
    /// one, is discarded and the flush error returned.
    pub fn write(&mut self, buf: Bytes, len: usize) -> Result<()> {
        self.accumulator.validate(&buf, len)?;

        if self.accumulator.needs_flush_before(len) {
            self.flush()?;
        }

        let outcome = self.accumulator.append(buf, len)?;
        if outcome.should_flush_now {
            self.flush()?;
        }
        Ok(())
    }

    /// Send everything pending. No-op when empty.
    ///
    /// The batch is consumed either way; on failure `pkt_sent` is left
    /// alone and [`last_flush`](Self::last_flush) tells how far it got.
    pub fn flush(&mut self) -> Result<()> {
        if self.accumulator.is_empty() {
            return Ok(());
        }

        let strategy = self.accumulator.strategy();
        let packets = self.accumulator.take_all();
        let bytes: usize = packets.iter().map(Bytes::len).sum();
        let refs: Vec<&[u8]> = packets.iter().map(|p| p.as_ref()).collect();
        let runs = match strategy {
            BatchStrategy::Segmented {
                max_segments,
                max_bytes,
            } => plan_segments(&packets, max_segments, max_bytes),
            _ => Vec::new(),
        };

        let destinations = match self.paths {
            Some(paths) => paths.destinations(),
            None => Destinations::single(self.peer),
        };

        let mut report = FlushReport {
            packets: packets.len(),
            bytes,
            paths: Vec::with_capacity(destinations.len()),
        };
        let mut failures = Vec::new();

        for (path, dest) in destinations.iter() {
            let socket: &mut S = match (path, self.alt_socket.as_deref_mut()) {
                (PathId::Alternate, Some(alt)) => alt,
                _ => &mut *self.socket,
            };

            let mut progress = Progress::default();
            let result = transmit(
                socket,
                strategy.flush_path(),
                &refs,
                &runs,
                dest,
                &mut progress,
            );

            report.paths.push(PathOutcome {
                path,
                dest,
                sent: progress.sent,
                syscalls: progress.syscalls,
                error: result.as_ref().err().map(io::Error::kind),
            });

            if let Err(e) = result {
                trace_warn!(
                    "flush on {} path to {} failed after {}/{} datagrams: {}",
                    path,
                    dest,
                    progress.sent,
                    packets.len(),
                    e
                );
                failures.push(FlushError::new(path, progress.sent, packets.len(), e));
            }
        }

        self.flushes += 1;
        let delivered = report.is_success();
        self.last_flush = Some(report);

        if !delivered {
            if let Some(err) = failures.into_iter().next() {
                if let Some(stats) = self.stats {
                    if let Err(_e) = stats.on_write_failed(&err) {
                        trace_warn!("stats sink: {}", _e);
                    }
                }
                return Err(err.into());
            }
        }

        self.pkt_sent += packets.len() as u64;
        if let Some(stats) = self.stats {
            if let Err(_e) = stats.on_packets_written(packets.len() as u64, bytes as u64) {
                trace_warn!("stats sink: {}", _e);
            }
        }
        Ok(())
    }

    /// Datagrams confirmed sent since construction.
    #[inline]
    pub fn pkt_sent(&self) -> u64 {
        self.pkt_sent
    }

    /// Flush attempts that reached the socket.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn last_flush(&self) -> Option<&FlushReport> {
        self.last_flush.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.accumulator.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.accumulator.pending_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulator.is_empty()
    }

    pub fn strategy(&self) -> BatchStrategy {
        self.accumulator.strategy()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[derive(Default)]
struct Progress {
    sent: usize,
    syscalls: usize,
}

fn transmit<S: DatagramSocket + ?Sized>(
    socket: &mut S,
    path: FlushPath,
    packets: &[&[u8]],
    runs: &[SegmentRun],
    dest: SocketAddr,
    progress: &mut Progress,
) -> io::Result<()> {
    match path {
        FlushPath::Single => {
            for packet in packets {
                progress.syscalls += 1;
                socket.send_to(packet, dest)?;
                progress.sent += 1;
            }
            Ok(())
        }
        FlushPath::Batch => send_batched(packets, progress, |p| socket.send_batch(p, dest)),
        FlushPath::Segments => {
            for run in runs {
                send_batched(&packets[run.range()], progress, |p| {
                    socket.send_segments(p, run.segment_size, dest)
                })?;
            }
            Ok(())
        }
    }
}

/// Drive a batch call until every packet is accepted, resuming after short
/// counts.
fn send_batched<F>(packets: &[&[u8]], progress: &mut Progress, mut send: F) -> io::Result<()>
where
    F: FnMut(&[&[u8]]) -> io::Result<usize>,
{
    let mut offset = 0;
    while offset < packets.len() {
        progress.syscalls += 1;
        let n = send(&packets[offset..])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "socket accepted no datagrams",
            ));
        }
        let n = n.min(packets.len() - offset);
        offset += n;
        progress.sent += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use crate::stats::BatchCounters;
    use std::collections::VecDeque;

    /// Records datagrams; pops scripted results per call.
    #[derive(Default)]
    struct ScriptSocket {
        sent: Vec<(SocketAddr, Vec<u8>)>,
        calls: usize,
        /// `Some(n)`: accept at most n datagrams. `None`: fail with WouldBlock.
        script: VecDeque<Option<usize>>,
        gso: bool,
    }

    impl ScriptSocket {
        fn next_limit(&mut self, want: usize) -> io::Result<usize> {
            self.calls += 1;
            match self.script.pop_front() {
                Some(None) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Some(Some(n)) => Ok(n.min(want)),
                None => Ok(want),
            }
        }
    }

    impl DatagramSocket for ScriptSocket {
        fn send_to(&mut self, packet: &[u8], dest: SocketAddr) -> io::Result<usize> {
            let n = self.next_limit(1)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            self.sent.push((dest, packet.to_vec()));
            Ok(packet.len())
        }

        fn send_batch(&mut self, packets: &[&[u8]], dest: SocketAddr) -> io::Result<usize> {
            let n = self.next_limit(packets.len())?;
            for p in &packets[..n] {
                self.sent.push((dest, p.to_vec()));
            }
            Ok(n)
        }

        fn send_segments(
            &mut self,
            packets: &[&[u8]],
            _segment_size: usize,
            dest: SocketAddr,
        ) -> io::Result<usize> {
            self.send_batch(packets, dest)
        }

        fn segmentation_offload(&self) -> bool {
            self.gso
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:1234".parse().unwrap()
    }

    fn test_buf() -> Bytes {
        Bytes::from_static(b"Test")
    }

    #[test]
    fn test_counted_defers_until_limit() {
        let mut sock = ScriptSocket::default();
        let mut writer = BatchWriter::new(BatchStrategy::counted(3), &mut sock, peer());

        writer.write(test_buf(), 4).unwrap();
        writer.write(test_buf(), 4).unwrap();
        assert_eq!(writer.pkt_sent(), 0);
        assert_eq!(writer.pending(), 2);

        writer.write(test_buf(), 4).unwrap();
        assert_eq!(writer.pkt_sent(), 3);
        assert!(writer.is_empty());
        assert_eq!(writer.last_flush().unwrap().syscalls(), 1);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let mut sock = ScriptSocket::default();
        let mut writer = BatchWriter::new(BatchStrategy::counted(3), &mut sock, peer());
        writer.flush().unwrap();
        assert_eq!(writer.pkt_sent(), 0);
        assert_eq!(writer.flush_count(), 0);
        assert!(writer.last_flush().is_none());
    }

    #[test]
    fn test_short_batch_is_resumed() {
        let mut sock = ScriptSocket {
            script: VecDeque::from([Some(2), Some(1)]),
            ..Default::default()
        };
        let mut writer = BatchWriter::new(BatchStrategy::unbounded(), &mut sock, peer());
        for _ in 0..5 {
            writer.write(test_buf(), 4).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(writer.pkt_sent(), 5);
        assert_eq!(writer.last_flush().unwrap().syscalls(), 3);
        drop(writer);
        assert_eq!(sock.sent.len(), 5);
    }

    #[test]
    fn test_failed_flush_discards_and_reports_partial() {
        let mut sock = ScriptSocket {
            script: VecDeque::from([Some(2), None]),
            ..Default::default()
        };
        let counters = BatchCounters::new();
        let mut writer = BatchWriter::new(BatchStrategy::unbounded(), &mut sock, peer())
            .with_stats(&counters);
        for _ in 0..5 {
            writer.write(test_buf(), 4).unwrap();
        }

        let err = writer.flush().unwrap_err();
        let flush = err.as_flush().unwrap();
        assert_eq!(flush.sent, 2);
        assert_eq!(flush.total, 5);
        assert!(flush.is_transient());

        assert_eq!(writer.pkt_sent(), 0);
        assert!(writer.is_empty());
        assert_eq!(writer.last_flush().unwrap().confirmed(), 2);
        assert!(!writer.last_flush().unwrap().is_success());
        assert_eq!(counters.snapshot().failed_flushes, 1);

        // the writer stays usable
        writer.write(test_buf(), 4).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.pkt_sent(), 1);
    }

    #[test]
    fn test_immediate_write_escalates_flush_failure() {
        let mut sock = ScriptSocket {
            script: VecDeque::from([Some(1), None]),
            ..Default::default()
        };
        let mut writer = BatchWriter::new(BatchStrategy::Immediate, &mut sock, peer());
        writer.write(test_buf(), 4).unwrap();
        let err = writer.write(test_buf(), 4).unwrap_err();
        assert!(matches!(err, BatchError::Flush(_)));
        assert_eq!(writer.pkt_sent(), 1);
        assert!(writer.is_empty());
    }

    #[test]
    fn test_rejected_write_has_no_side_effects() {
        let mut sock = ScriptSocket::default();
        let mut writer = BatchWriter::new(BatchStrategy::counted(2), &mut sock, peer());
        writer.write(test_buf(), 4).unwrap();

        assert!(writer.write(Bytes::new(), 0).unwrap_err().is_rejection());
        assert!(writer.write(test_buf(), 5).unwrap_err().is_rejection());
        assert_eq!(writer.pending(), 1);
        assert_eq!(writer.pkt_sent(), 0);
        drop(writer);
        assert_eq!(sock.calls, 0);
    }

    #[test]
    fn test_segmented_without_offload_degrades() {
        let mut sock = ScriptSocket::default();
        let writer = BatchWriter::new(BatchStrategy::segmented(8, 65_000), &mut sock, peer());
        assert_eq!(writer.strategy(), BatchStrategy::counted(8));
    }

    #[test]
    fn test_segmented_splits_runs() {
        let mut sock = ScriptSocket {
            gso: true,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(BatchStrategy::segmented(16, 65_000), &mut sock, peer());
        for len in [1200, 1200, 700, 1200] {
            writer.write(Bytes::from(vec![1u8; len]), len).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(writer.pkt_sent(), 4);
        // [1200, 1200, 700] + [1200]
        assert_eq!(writer.last_flush().unwrap().syscalls(), 2);
    }

    #[test]
    fn test_segmented_flushes_before_byte_ceiling() {
        let mut sock = ScriptSocket {
            gso: true,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(BatchStrategy::segmented(16, 3000), &mut sock, peer());
        writer.write(Bytes::from(vec![0u8; 1200]), 1200).unwrap();
        writer.write(Bytes::from(vec![0u8; 1200]), 1200).unwrap();
        assert_eq!(writer.pkt_sent(), 0);

        // 3600 > 3000: the first two go out before this one is queued
        writer.write(Bytes::from(vec![0u8; 1200]), 1200).unwrap();
        assert_eq!(writer.pkt_sent(), 2);
        assert_eq!(writer.pending(), 1);
        assert_eq!(writer.pending_bytes(), 1200);
    }

    #[test]
    fn test_racing_writes_both_paths() {
        let primary: SocketAddr = "[::1]:4433".parse().unwrap();
        let alternate: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        let mut he = HappyEyeballs::race(primary, alternate);
        he.on_attempt_delay_expired();

        let mut sock = ScriptSocket::default();
        let mut alt = ScriptSocket::default();
        {
            let mut writer = BatchWriter::new(BatchStrategy::counted(2), &mut sock, primary)
                .with_happy_eyeballs(&he)
                .with_alternate_socket(&mut alt);
            writer.write(test_buf(), 4).unwrap();
            writer.write(test_buf(), 4).unwrap();
            assert_eq!(writer.pkt_sent(), 2);
            assert_eq!(writer.last_flush().unwrap().paths.len(), 2);
        }
        assert!(sock.sent.iter().all(|(d, _)| *d == primary));
        assert!(alt.sent.iter().all(|(d, _)| *d == alternate));
        assert_eq!(sock.sent.len(), 2);
        assert_eq!(alt.sent.len(), 2);
    }

    #[test]
    fn test_racing_tolerates_one_failed_path() {
        let primary: SocketAddr = "[::1]:4433".parse().unwrap();
        let alternate: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        let mut he = HappyEyeballs::race(primary, alternate);
        he.on_attempt_delay_expired();

        let mut sock = ScriptSocket {
            script: VecDeque::from([None]),
            ..Default::default()
        };
        let mut alt = ScriptSocket::default();
        let mut writer = BatchWriter::new(BatchStrategy::unbounded(), &mut sock, primary)
            .with_happy_eyeballs(&he)
            .with_alternate_socket(&mut alt);
        writer.write(test_buf(), 4).unwrap();
        writer.flush().unwrap();

        let report = writer.last_flush().unwrap();
        assert_eq!(
            report.path(PathId::Primary).unwrap().error,
            Some(io::ErrorKind::WouldBlock)
        );
        assert!(report.path(PathId::Alternate).unwrap().is_complete(1));
        assert_eq!(writer.pkt_sent(), 1);
    }
}
