//! Write statistics.
//!
//! A sink is best-effort telemetry: its errors are logged and dropped,
//! they never fail a flush.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FlushError, StatsError};

pub trait StatsSink {
    /// A flush delivered `packets` datagrams totalling `bytes`.
    fn on_packets_written(&self, packets: u64, bytes: u64) -> Result<(), StatsError>;

    /// A flush failed and its batch was discarded.
    fn on_write_failed(&self, _error: &FlushError) -> Result<(), StatsError> {
        Ok(())
    }
}

/// Lock-free counters, shareable across the connection group.
#[derive(Debug, Default)]
pub struct BatchCounters {
    flushes: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
    failed_flushes: AtomicU64,
    transient_failures: AtomicU64,
}

/// Point-in-time copy of [`BatchCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub flushes: u64,
    pub packets: u64,
    pub bytes: u64,
    pub failed_flushes: u64,
    pub transient_failures: u64,
}

impl CountersSnapshot {
    /// Average datagrams per successful flush.
    pub fn avg_packets_per_flush(&self) -> f64 {
        if self.flushes == 0 {
            0.0
        } else {
            self.packets as f64 / self.flushes as f64
        }
    }
}

impl BatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.flushes.store(0, Ordering::Relaxed);
        self.packets.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.failed_flushes.store(0, Ordering::Relaxed);
        self.transient_failures.store(0, Ordering::Relaxed);
    }
}

impl StatsSink for BatchCounters {
    fn on_packets_written(&self, packets: u64, bytes: u64) -> Result<(), StatsError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.packets.fetch_add(packets, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn on_write_failed(&self, error: &FlushError) -> Result<(), StatsError> {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        if error.is_transient() {
            self.transient_failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::happy_eyeballs::PathId;
    use std::io;

    #[test]
    fn test_counters_accumulate() {
        let counters = BatchCounters::new();
        counters.on_packets_written(10, 12_000).unwrap();
        counters.on_packets_written(4, 4_800).unwrap();

        let snap = counters.snapshot();
        assert_eq!(snap.flushes, 2);
        assert_eq!(snap.packets, 14);
        assert_eq!(snap.bytes, 16_800);
        assert!((snap.avg_packets_per_flush() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_track_failures() {
        let counters = BatchCounters::new();
        let wouldblock = FlushError::new(
            PathId::Primary,
            0,
            3,
            io::Error::from(io::ErrorKind::WouldBlock),
        );
        let hard = FlushError::new(
            PathId::Primary,
            1,
            3,
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        counters.on_write_failed(&wouldblock).unwrap();
        counters.on_write_failed(&hard).unwrap();

        let snap = counters.snapshot();
        assert_eq!(snap.failed_flushes, 2);
        assert_eq!(snap.transient_failures, 1);

        counters.reset();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
    }

    #[test]
    fn test_avg_with_no_flushes() {
        assert_eq!(CountersSnapshot::default().avg_packets_per_flush(), 0.0);
    }
}
