//! sendmmsg batch UDP send (Linux)
//!
//! One syscall for up to `capacity` datagrams to a single destination.
//! Used by `UdpBatchSocket` for counted batches.

use std::io;
use std::mem;
use std::net::SocketAddr;

use libc::{iovec, mmsghdr, sendmmsg, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};

/// Destination address in the layout the kernel expects.
pub(crate) struct RawAddr {
    storage: sockaddr_storage,
    len: socklen_t,
}

impl RawAddr {
    pub(crate) fn new(addr: &SocketAddr) -> Self {
        // Safety: sockaddr_storage is valid when zeroed
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let len = match addr {
            SocketAddr::V4(v4) => {
                // Safety: sockaddr_storage is large enough and aligned for sockaddr_in
                let sin =
                    unsafe { &mut *(&mut storage as *mut sockaddr_storage).cast::<sockaddr_in>() };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                mem::size_of::<sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                // Safety: sockaddr_storage is large enough and aligned for sockaddr_in6
                let sin6 =
                    unsafe { &mut *(&mut storage as *mut sockaddr_storage).cast::<sockaddr_in6>() };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_scope_id = v6.scope_id();
                mem::size_of::<sockaddr_in6>()
            }
        };
        Self {
            storage,
            len: len as socklen_t,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        (&mut self.storage as *mut sockaddr_storage).cast()
    }

    pub(crate) fn len(&self) -> socklen_t {
        self.len
    }
}

pub struct BatchSender {
    msgvec: Vec<mmsghdr>,
    iovecs: Vec<iovec>,
}

impl BatchSender {
    /// Create a new batch sender with the given batch size.
    ///
    /// # Panics
    /// Panics if `batch_size` is 0.
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        // Safety: libc mmsghdr, iovec are valid when zeroed
        Self {
            msgvec: vec![unsafe { mem::zeroed() }; batch_size],
            iovecs: vec![unsafe { mem::zeroed() }; batch_size],
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.msgvec.len()
    }

    /// Send up to `capacity` packets to `addr`, returns how many the kernel
    /// accepted.
    ///
    /// # Safety
    /// `fd` must be an open datagram socket.
    pub unsafe fn send_batch(
        &mut self,
        fd: i32,
        packets: &[&[u8]],
        addr: &SocketAddr,
    ) -> io::Result<usize> {
        if packets.is_empty() {
            return Ok(0);
        }
        let count = packets.len().min(self.msgvec.len());
        let mut raw = RawAddr::new(addr);

        for i in 0..count {
            self.iovecs[i].iov_base = packets[i].as_ptr() as *mut _;
            self.iovecs[i].iov_len = packets[i].len();
            self.msgvec[i].msg_hdr.msg_name = raw.as_mut_ptr();
            self.msgvec[i].msg_hdr.msg_namelen = raw.len();
            self.msgvec[i].msg_hdr.msg_iov = &mut self.iovecs[i] as *mut _;
            self.msgvec[i].msg_hdr.msg_iovlen = 1;
            self.msgvec[i].msg_hdr.msg_control = std::ptr::null_mut();
            self.msgvec[i].msg_hdr.msg_controllen = 0;
            self.msgvec[i].msg_hdr.msg_flags = 0;
            self.msgvec[i].msg_len = 0;
        }

        loop {
            let r = sendmmsg(fd, self.msgvec.as_mut_ptr(), count as u32, 0);
            if r >= 0 {
                return Ok(r as usize);
            }
            let e = io::Error::last_os_error();
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e);
            }
        }
    }
}

// Safety: BatchSender owns all its data and doesn't share references across threads
unsafe impl Send for BatchSender {}
