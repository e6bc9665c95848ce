//! UDP generic segmentation offload (Linux)
//!
//! One `sendmsg` carrying a run of equally sized datagrams as a single
//! iovec list plus a `UDP_SEGMENT` control message; the kernel (or NIC)
//! cuts it back into datagrams.

use std::io;
use std::mem;
use std::net::SocketAddr;

use libc::{cmsghdr, iovec, msghdr, sendmsg, CMSG_DATA, CMSG_FIRSTHDR, CMSG_LEN, CMSG_SPACE};

use crate::sendmmsg::RawAddr;
use crate::strategy::MAX_GSO_SEGMENTS;

/// Room for one cmsghdr carrying a u16, with alignment slack.
const CMSG_BUF_LEN: usize = 64;

#[repr(C, align(8))]
struct CmsgBuf([u8; CMSG_BUF_LEN]);

/// Whether the kernel accepts `UDP_SEGMENT` on this socket (Linux 4.18+).
pub fn probe(fd: i32) -> bool {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // Safety: value and len outlive the call and match the option size
    let r = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_UDP,
            libc::UDP_SEGMENT,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    r == 0
}

pub struct SegmentSender {
    iovecs: Vec<iovec>,
    control: CmsgBuf,
}

impl SegmentSender {
    pub fn new() -> Self {
        Self {
            // Safety: libc iovec is valid when zeroed
            iovecs: vec![unsafe { mem::zeroed() }; MAX_GSO_SEGMENTS],
            control: CmsgBuf([0u8; CMSG_BUF_LEN]),
        }
    }

    /// Send one run. All-or-nothing: returns `packets.len()` on success.
    ///
    /// # Safety
    /// `fd` must be an open datagram socket.
    pub unsafe fn send_segments(
        &mut self,
        fd: i32,
        packets: &[&[u8]],
        segment_size: usize,
        addr: &SocketAddr,
    ) -> io::Result<usize> {
        if packets.is_empty() {
            return Ok(0);
        }
        if packets.len() > self.iovecs.len() || segment_size > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment run exceeds GSO limits",
            ));
        }

        for (iov, packet) in self.iovecs.iter_mut().zip(packets) {
            iov.iov_base = packet.as_ptr() as *mut _;
            iov.iov_len = packet.len();
        }

        let mut raw = RawAddr::new(addr);
        let mut hdr: msghdr = mem::zeroed();
        hdr.msg_name = raw.as_mut_ptr();
        hdr.msg_namelen = raw.len();
        hdr.msg_iov = self.iovecs.as_mut_ptr();
        hdr.msg_iovlen = packets.len() as _;
        hdr.msg_control = self.control.0.as_mut_ptr() as *mut libc::c_void;
        hdr.msg_controllen = CMSG_SPACE(mem::size_of::<u16>() as u32) as _;

        let cmsg: *mut cmsghdr = CMSG_FIRSTHDR(&hdr);
        if cmsg.is_null() {
            return Err(io::Error::other("control buffer too small"));
        }
        (*cmsg).cmsg_level = libc::SOL_UDP;
        (*cmsg).cmsg_type = libc::UDP_SEGMENT;
        (*cmsg).cmsg_len = CMSG_LEN(mem::size_of::<u16>() as u32) as _;
        std::ptr::write_unaligned(CMSG_DATA(cmsg) as *mut u16, segment_size as u16);

        loop {
            let r = sendmsg(fd, &hdr, 0);
            if r >= 0 {
                return Ok(packets.len());
            }
            let e = io::Error::last_os_error();
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e);
            }
        }
    }
}

impl Default for SegmentSender {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: SegmentSender owns all its data and doesn't share references across threads
unsafe impl Send for SegmentSender {}
