//! Delivery verification: what the socket saw against what was written.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

/// Checks that received datagrams match the written ones, in order.
#[derive(Debug, Default)]
pub struct OrderVerifier {
    expected: Vec<u64>,
}

impl OrderVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next written datagram.
    pub fn expect(&mut self, data: &[u8]) {
        self.expected.push(simple_hash(data));
    }

    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    /// Compare `received` with everything registered so far.
    pub fn verify<'a>(&self, received: impl IntoIterator<Item = &'a [u8]>) -> VerifyStats {
        let mut remaining: HashMap<u64, usize> = HashMap::new();
        for h in &self.expected {
            *remaining.entry(*h).or_default() += 1;
        }

        let mut stats = VerifyStats {
            expected_count: self.expected.len() as u64,
            ..Default::default()
        };

        for (i, data) in received.into_iter().enumerate() {
            let hash = simple_hash(data);
            stats.received_count += 1;

            match remaining.get_mut(&hash) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    if self.expected.get(i) != Some(&hash) {
                        stats.out_of_order += 1;
                    }
                }
                Some(_) => stats.duplicates += 1,
                None => stats.mismatches += 1,
            }
        }

        stats.missing = remaining.values().map(|&n| n as u64).sum();
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyStats {
    pub expected_count: u64,
    pub received_count: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    /// Received datagrams that were never written.
    pub mismatches: u64,
    pub missing: u64,
}

impl VerifyStats {
    pub fn delivery_rate(&self) -> f64 {
        if self.expected_count > 0 {
            (self.expected_count - self.missing) as f64 / self.expected_count as f64
        } else {
            1.0
        }
    }

    /// Everything arrived once, in order.
    pub fn is_exact(&self) -> bool {
        self.missing == 0 && self.duplicates == 0 && self.mismatches == 0 && self.out_of_order == 0
    }
}

/// `len` bytes starting with big-endian `seq`, padded with its low byte.
pub fn sequenced_payload(seq: u64, len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(len.max(8));
    buf.put_u64(seq);
    buf.resize(len.max(8), seq as u8);
    buf.truncate(len);
    buf.freeze()
}

/// FNV-1a
fn simple_hash(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(n: u64) -> (OrderVerifier, Vec<Bytes>) {
        let mut v = OrderVerifier::new();
        let data: Vec<Bytes> = (0..n).map(|i| sequenced_payload(i, 32)).collect();
        for d in &data {
            v.expect(d);
        }
        (v, data)
    }

    #[test]
    fn test_exact_delivery() {
        let (v, data) = written(10);
        assert_eq!(v.expected_count(), 10);
        let stats = v.verify(data.iter().map(|d| &d[..]));
        assert!(stats.is_exact());
        assert_eq!(stats.delivery_rate(), 1.0);
    }

    #[test]
    fn test_detects_loss_and_reorder() {
        let (v, data) = written(4);
        let received = [&data[1][..], &data[0][..], &data[3][..]];
        let stats = v.verify(received);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.out_of_order, 3);
        assert!((stats.delivery_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_detects_duplicates_and_strangers() {
        let (v, data) = written(2);
        let received = [&data[0][..], &data[0][..], &data[1][..], &b"stranger"[..]];
        let stats = v.verify(received);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.missing, 0);
    }

    #[test]
    fn test_sequenced_payload() {
        let p = sequenced_payload(7, 12);
        assert_eq!(p.len(), 12);
        assert_eq!(&p[..8], &7u64.to_be_bytes());
        assert_eq!(sequenced_payload(1, 4).len(), 4);
    }
}
