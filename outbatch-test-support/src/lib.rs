//! Test support for outbatch.
//!
//! - [`socket::MemorySocket`]: records every datagram and syscall, injects faults
//! - [`verify::OrderVerifier`]: checks what arrived against what was written

pub mod socket;
pub mod verify;

pub use socket::{CallKind, FaultPlan, MemorySocket, SentDatagram, SocketCall};
pub use verify::{sequenced_payload, OrderVerifier, VerifyStats};
