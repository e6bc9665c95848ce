//! In-memory datagram socket with fault injection.
//!
//! # Example
//!
//! ```
//! use outbatch_test_support::{FaultPlan, MemorySocket};
//!
//! // accept 10 datagrams, then report a full send buffer
//! let socket = MemorySocket::new().with_faults(FaultPlan::new().would_block_after(10));
//! assert_eq!(socket.sent().len(), 0);
//! ```

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;

use outbatch::DatagramSocket;
use rand::Rng;

/// Which trait method a call came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Single,
    Batch,
    Segments { segment_size: usize },
}

/// One socket call as the kernel would have seen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCall {
    pub kind: CallKind,
    pub dest: SocketAddr,
    /// Datagrams handed in.
    pub offered: usize,
    /// Datagrams accepted.
    pub accepted: usize,
    pub error: Option<io::ErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub dest: SocketAddr,
    pub data: Vec<u8>,
    /// Index into [`MemorySocket::calls`].
    pub call: usize,
}

/// Faults a [`MemorySocket`] injects. Combine freely.
#[derive(Debug, Clone)]
pub struct FaultPlan {
    would_block_after: Option<usize>,
    fail_calls: HashSet<usize>,
    failure_probability: f64,
    error_kind: io::ErrorKind,
    max_per_call: Option<usize>,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultPlan {
    /// No faults.
    pub fn new() -> Self {
        Self {
            would_block_after: None,
            fail_calls: HashSet::new(),
            failure_probability: 0.0,
            error_kind: io::ErrorKind::PermissionDenied,
            max_per_call: None,
        }
    }

    /// Accept `n` datagrams in total, then return `WouldBlock` on every call.
    pub fn would_block_after(mut self, n: usize) -> Self {
        self.would_block_after = Some(n);
        self
    }

    /// Fail the given calls (0-based) with the plan's error kind.
    pub fn fail_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_calls.extend(calls);
        self
    }

    /// Fail each call with probability `prob`.
    pub fn with_failure_probability(mut self, prob: f64) -> Self {
        self.failure_probability = prob.clamp(0.0, 1.0);
        self
    }

    /// Error kind for injected failures (default `PermissionDenied`).
    pub fn with_error_kind(mut self, kind: io::ErrorKind) -> Self {
        self.error_kind = kind;
        self
    }

    /// Accept at most `n` datagrams per batch call.
    pub fn short_writes(mut self, n: usize) -> Self {
        self.max_per_call = Some(n.max(1));
        self
    }
}

pub struct MemorySocket {
    sent: Vec<SentDatagram>,
    calls: Vec<SocketCall>,
    plan: FaultPlan,
    offload: bool,
    accepted_total: usize,
    rng: rand::rngs::ThreadRng,
}

impl Default for MemorySocket {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySocket {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            calls: Vec::new(),
            plan: FaultPlan::new(),
            offload: false,
            accepted_total: 0,
            rng: rand::thread_rng(),
        }
    }

    pub fn with_faults(mut self, plan: FaultPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Advertise segmentation offload.
    pub fn with_offload(mut self, offload: bool) -> Self {
        self.offload = offload;
        self
    }

    pub fn set_faults(&mut self, plan: FaultPlan) {
        self.plan = plan;
    }

    pub fn sent(&self) -> &[SentDatagram] {
        &self.sent
    }

    pub fn sent_to(&self, dest: SocketAddr) -> impl Iterator<Item = &SentDatagram> {
        self.sent.iter().filter(move |d| d.dest == dest)
    }

    pub fn payloads(&self) -> Vec<&[u8]> {
        self.sent.iter().map(|d| d.data.as_slice()).collect()
    }

    pub fn calls(&self) -> &[SocketCall] {
        &self.calls
    }

    pub fn syscalls(&self) -> usize {
        self.calls.len()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.calls.clear();
        self.accepted_total = 0;
    }

    /// How many of `offered` datagrams this call accepts.
    fn admit(&mut self, kind: CallKind, dest: SocketAddr, offered: usize) -> io::Result<usize> {
        let call = self.calls.len();
        let outcome = self.decide(call, kind, offered);

        self.calls.push(SocketCall {
            kind,
            dest,
            offered,
            accepted: *outcome.as_ref().unwrap_or(&0),
            error: outcome.as_ref().err().map(io::Error::kind),
        });
        if let Ok(n) = outcome {
            self.accepted_total += n;
        }
        outcome
    }

    fn decide(&mut self, call: usize, kind: CallKind, offered: usize) -> io::Result<usize> {
        if self.plan.fail_calls.contains(&call) {
            return Err(io::Error::from(self.plan.error_kind));
        }
        if self.plan.failure_probability > 0.0
            && self.rng.gen::<f64>() < self.plan.failure_probability
        {
            return Err(io::Error::from(self.plan.error_kind));
        }

        let mut n = offered;
        if let Some(max) = self.plan.max_per_call {
            n = n.min(max);
        }
        if let Some(limit) = self.plan.would_block_after {
            n = n.min(limit.saturating_sub(self.accepted_total));
        }

        match kind {
            // one GSO send is all-or-nothing
            CallKind::Segments { .. } if n < offered => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            _ if n == 0 => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            _ => Ok(n),
        }
    }

    fn record(&mut self, packets: &[&[u8]], dest: SocketAddr) {
        let call = self.calls.len() - 1;
        self.sent.extend(packets.iter().map(|p| SentDatagram {
            dest,
            data: p.to_vec(),
            call,
        }));
    }
}

impl DatagramSocket for MemorySocket {
    fn send_to(&mut self, packet: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.admit(CallKind::Single, dest, 1)?;
        self.record(&[packet], dest);
        Ok(packet.len())
    }

    fn send_batch(&mut self, packets: &[&[u8]], dest: SocketAddr) -> io::Result<usize> {
        if packets.is_empty() {
            return Ok(0);
        }
        let n = self.admit(CallKind::Batch, dest, packets.len())?;
        self.record(&packets[..n], dest);
        Ok(n)
    }

    fn send_segments(
        &mut self,
        packets: &[&[u8]],
        segment_size: usize,
        dest: SocketAddr,
    ) -> io::Result<usize> {
        if !self.offload {
            return self.send_batch(packets, dest);
        }
        if packets.is_empty() {
            return Ok(0);
        }
        let n = self.admit(CallKind::Segments { segment_size }, dest, packets.len())?;
        self.record(packets, dest);
        Ok(n)
    }

    fn segmentation_offload(&self) -> bool {
        self.offload
    }
}
