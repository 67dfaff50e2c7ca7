//! Low-level async route-netlink socket.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::error::Result;

/// The RTNLGRP_LINK multicast group (link state changes).
pub const RTNLGRP_LINK: u32 = 1;

/// Receive buffer size for a single netlink datagram. Comfortably larger
/// than any link or neighbor dump fragment the kernel emits.
pub const RECV_BUF_SIZE: usize = 32768;

/// `NETLINK_GET_STRICT_CHK` socket option (not exposed by netlink-sys).
const NETLINK_GET_STRICT_CHK: libc::c_int = 12;

/// Async socket on the kernel's route netlink family.
pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    pid: u32,
}

impl NetlinkSocket {
    /// Create a non-blocking NETLINK_ROUTE socket bound to an autoassigned
    /// port ID.
    pub fn open() -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_ROUTE)?;
        socket.set_non_blocking(true)?;

        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        let fd = AsyncFd::new(socket)?;

        Ok(Self {
            fd,
            seq: AtomicU32::new(1),
            pid,
        })
    }

    /// Enable kernel-side strict validation of dump requests.
    pub fn set_strict_checking(&self, on: bool) -> Result<()> {
        let val: libc::c_int = on.into();
        // SAFETY: plain setsockopt on a socket we own; the kernel only reads
        // `val` for the duration of the call.
        let rc = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_NETLINK,
                NETLINK_GET_STRICT_CHK,
                (&raw const val).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Subscribe to a multicast group.
    pub fn subscribe(&mut self, group: u32) -> Result<()> {
        self.fd.get_mut().add_membership(group)?;
        Ok(())
    }

    /// Get the next request sequence number.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the local port ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send a message.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;
            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one datagram, waiting for it if necessary.
    pub async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(RECV_BUF_SIZE);
        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;
            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(buf.to_vec());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Wait until the socket is readable, then drain every queued datagram.
    ///
    /// Returns when a receive would block, so a subsequent call blocks until
    /// new data arrives. This is the multicast absorption step: one call
    /// yields everything the kernel queued since the previous cycle.
    pub async fn drain(&self) -> Result<Vec<Vec<u8>>> {
        let mut guard = self.fd.ready(Interest::READABLE).await?;
        let mut datagrams = Vec::new();

        loop {
            let mut buf = BytesMut::with_capacity(RECV_BUF_SIZE);
            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    result?;
                    datagrams.push(buf.to_vec());
                }
                Err(_would_block) => break,
            }
        }

        Ok(datagrams)
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}
