//! Blast datagrams over loopback and report what arrived.
//!
//! cargo run --release --example blast -- [none|gso|sendmmsg|sendmmsg_gso] [batch] [count]

use bytes::Bytes;
use outbatch::{
    BatchConfig, BatchCounters, BatchWriter, BatchingMode, DatagramSocket, UdpBatchSocket,
};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PAYLOAD: usize = 1200;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let mode: BatchingMode = args.next().unwrap_or_else(|| "sendmmsg".into()).parse()?;
    let batch: usize = args.next().map(|s| s.parse()).transpose()?.unwrap_or(16);
    let count: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(200_000);

    let strategy = BatchConfig::new(mode).with_max_batch_size(batch).strategy()?;

    let receiver = UdpSocket::bind("127.0.0.1:0")?;
    receiver.set_read_timeout(Some(Duration::from_millis(200)))?;
    let dest = receiver.local_addr()?;

    let received = Arc::new(AtomicU64::new(0));
    let recv_count = received.clone();
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        while receiver.recv_from(&mut buf).is_ok() {
            recv_count.fetch_add(1, Ordering::Relaxed);
        }
    });

    let mut socket = UdpBatchSocket::bind("127.0.0.1:0")?;
    let counters = BatchCounters::new();
    let payload = Bytes::from(vec![0x5A; PAYLOAD]);
    let mut failures = 0u64;

    println!(
        "mode={} strategy={:?} gso={}",
        mode,
        strategy,
        socket.segmentation_offload()
    );

    let start = Instant::now();
    let sent = {
        let mut writer = BatchWriter::new(strategy, &mut socket, dest).with_stats(&counters);
        for _ in 0..count {
            if writer.write(payload.clone(), PAYLOAD).is_err() {
                failures += 1;
            }
        }
        if writer.flush().is_err() {
            failures += 1;
        }
        writer.pkt_sent()
    };
    let elapsed = start.elapsed();

    reader.join().map_err(|_| "reader thread panicked")?;
    let snap = counters.snapshot();

    println!(
        "sent {} of {} in {:.2?} ({:.2} M/s), {} flushes, {:.1} datagrams/flush, {} failed flushes",
        sent,
        count,
        elapsed,
        sent as f64 / elapsed.as_secs_f64() / 1_000_000.0,
        snap.flushes,
        snap.avg_packets_per_flush(),
        failures
    );
    println!("received {}", received.load(Ordering::Relaxed));
    Ok(())
}
