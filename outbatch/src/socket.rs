//! Socket seam.
//!
//! [`DatagramSocket`] is the only I/O primitive the writer depends on.
//! [`UdpBatchSocket`] implements it over a non-blocking UDP socket with
//! `sendmmsg` and `UDP_SEGMENT` on Linux and sequential sends elsewhere.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

#[cfg(target_os = "linux")]
use crate::gso::SegmentSender;
#[cfg(target_os = "linux")]
use crate::sendmmsg::BatchSender;
#[cfg(target_os = "linux")]
use crate::strategy::MAX_COUNTED_BATCH;

/// Send buffer size (4MB, room for a full unbounded batch of MTU packets)
const SOCKET_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Non-blocking datagram sink.
///
/// `send_batch` and `send_segments` return how many datagrams the kernel
/// accepted, which may be fewer than given. An `Err` means none of the
/// remaining datagrams were sent.
pub trait DatagramSocket {
    /// Send one datagram, returns bytes written.
    fn send_to(&mut self, packet: &[u8], dest: SocketAddr) -> io::Result<usize>;

    /// Send datagrams in order.
    fn send_batch(&mut self, packets: &[&[u8]], dest: SocketAddr) -> io::Result<usize> {
        for (i, packet) in packets.iter().enumerate() {
            if let Err(e) = self.send_to(packet, dest) {
                return if i == 0 { Err(e) } else { Ok(i) };
            }
        }
        Ok(packets.len())
    }

    /// Send one segment run: every packet is `segment_size` bytes except
    /// the last, which may be shorter.
    fn send_segments(
        &mut self,
        packets: &[&[u8]],
        segment_size: usize,
        dest: SocketAddr,
    ) -> io::Result<usize> {
        let _ = segment_size;
        self.send_batch(packets, dest)
    }

    /// Whether `send_segments` is a single kernel-segmented send.
    fn segmentation_offload(&self) -> bool {
        false
    }
}

impl<T: DatagramSocket + ?Sized> DatagramSocket for &mut T {
    fn send_to(&mut self, packet: &[u8], dest: SocketAddr) -> io::Result<usize> {
        (**self).send_to(packet, dest)
    }

    fn send_batch(&mut self, packets: &[&[u8]], dest: SocketAddr) -> io::Result<usize> {
        (**self).send_batch(packets, dest)
    }

    fn send_segments(
        &mut self,
        packets: &[&[u8]],
        segment_size: usize,
        dest: SocketAddr,
    ) -> io::Result<usize> {
        (**self).send_segments(packets, segment_size, dest)
    }

    fn segmentation_offload(&self) -> bool {
        (**self).segmentation_offload()
    }
}

/// Plain std socket: one syscall per datagram.
impl DatagramSocket for UdpSocket {
    fn send_to(&mut self, packet: &[u8], dest: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, packet, dest)
    }
}

/// Non-blocking UDP socket with kernel batching where available.
pub struct UdpBatchSocket {
    socket: UdpSocket,
    #[cfg(target_os = "linux")]
    batch_sender: BatchSender,
    #[cfg(target_os = "linux")]
    segment_sender: SegmentSender,
    gso: bool,
}

impl UdpBatchSocket {
    /// Bind a non-blocking socket with a large send buffer.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.bind(&addr.into())?;

        Self::from_std(socket.into())
    }

    /// Wrap an existing socket. It is switched to non-blocking mode.
    pub fn from_std(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;

        #[cfg(target_os = "linux")]
        let gso = crate::gso::probe(socket.as_raw_fd());
        #[cfg(not(target_os = "linux"))]
        let gso = false;

        Ok(Self {
            socket,
            #[cfg(target_os = "linux")]
            batch_sender: BatchSender::new(MAX_COUNTED_BATCH),
            #[cfg(target_os = "linux")]
            segment_sender: SegmentSender::new(),
            gso,
        })
    }

    /// Turn segmentation offload off, e.g. for NICs that mangle it.
    pub fn disable_gso(&mut self) {
        self.gso = false;
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn into_inner(self) -> UdpSocket {
        self.socket
    }
}

impl DatagramSocket for UdpBatchSocket {
    fn send_to(&mut self, packet: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(packet, dest)
    }

    #[cfg(target_os = "linux")]
    fn send_batch(&mut self, packets: &[&[u8]], dest: SocketAddr) -> io::Result<usize> {
        // Safety: fd belongs to self.socket, which outlives the call
        unsafe {
            self.batch_sender
                .send_batch(self.socket.as_raw_fd(), packets, &dest)
        }
    }

    #[cfg(target_os = "linux")]
    fn send_segments(
        &mut self,
        packets: &[&[u8]],
        segment_size: usize,
        dest: SocketAddr,
    ) -> io::Result<usize> {
        if !self.gso || packets.len() < 2 {
            return self.send_batch(packets, dest);
        }
        // Safety: fd belongs to self.socket, which outlives the call
        unsafe {
            self.segment_sender
                .send_segments(self.socket.as_raw_fd(), packets, segment_size, &dest)
        }
    }

    fn segmentation_offload(&self) -> bool {
        self.gso
    }
}
