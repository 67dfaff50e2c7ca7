//! Gratuitous-ARP emission over a raw packet socket.
//!
//! Each destination gets one broadcast ARP reply sourced from its MAC with
//! a 0.0.0.0 sender IP: learning switches move the MAC to the port the
//! frame arrived on, and no host's IP-to-MAC cache is touched.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::{debug, error};
use zerocopy::byteorder::network_endian::U16;
use zerocopy::{Immutable, IntoBytes};

use crate::bond::Bond;
use crate::error::Result;
use crate::fdb::{Dst, FdbSet, MAC_BROADCAST};

const ETH_P_8021Q: u16 = 0x8100;
const ETH_P_ARP: u16 = 0x0806;
const ETH_P_IP: u16 = 0x0800;
const ARPHRD_ETHER: u16 = 1;
const ARPOP_REPLY: u16 = 2;

/// First 12 bytes of the frame: destination and source MACs.
#[repr(C)]
#[derive(IntoBytes, Immutable)]
struct EthMacs {
    dst: [u8; 6],
    src: [u8; 6],
}

/// The 4-byte 802.1Q tag, present only for tagged destinations. PCP and
/// DEI are always zero, so the VID bytes stand alone.
#[repr(C)]
#[derive(IntoBytes, Immutable)]
struct VlanTag {
    tpid: U16,
    vid: U16,
}

/// The remaining 30 bytes: ARP ethertype and payload.
#[repr(C)]
#[derive(IntoBytes, Immutable)]
struct ArpReply {
    etype: U16,
    htype: U16,
    ptype: U16,
    hlen: u8,
    plen: u8,
    op: U16,
    /// Sender hardware address: the destination's MAC.
    sha: [u8; 6],
    /// Sender protocol address: 0.0.0.0.
    spa: [u8; 4],
    /// Target hardware address: zeroes.
    tha: [u8; 6],
    /// Target protocol address: 0.0.0.0.
    tpa: [u8; 4],
}

/// The frame segments for one destination. The VLAN tag is only sent when
/// `dst.vlan != 0`.
fn frame(dst: &Dst) -> (EthMacs, VlanTag, ArpReply) {
    let macs = EthMacs {
        dst: MAC_BROADCAST,
        src: dst.mac,
    };
    let vlan = VlanTag {
        tpid: U16::new(ETH_P_8021Q),
        vid: U16::new(dst.vlan),
    };
    let arp = ArpReply {
        etype: U16::new(ETH_P_ARP),
        htype: U16::new(ARPHRD_ETHER),
        ptype: U16::new(ETH_P_IP),
        hlen: 6,
        plen: 4,
        op: U16::new(ARPOP_REPLY),
        sha: dst.mac,
        spa: [0; 4],
        tha: [0; 6],
        tpa: [0; 4],
    };
    (macs, vlan, arp)
}

/// Byte image of the frame a burst emits for `dst`: 42 bytes untagged, 46
/// bytes tagged.
pub fn frame_bytes(dst: &Dst) -> Vec<u8> {
    let (macs, vlan, arp) = frame(dst);
    let mut buf = macs.as_bytes().to_vec();
    if dst.vlan != 0 {
        buf.extend_from_slice(vlan.as_bytes());
    }
    buf.extend_from_slice(arp.as_bytes());
    buf
}

/// Raw `AF_PACKET` socket used for every outgoing ARP frame.
pub struct GarpSocket {
    fd: RawFd,
}

impl GarpSocket {
    /// Open the packet socket. Requires CAP_NET_RAW.
    pub fn open() -> Result<Self> {
        // SAFETY: plain socket(2) call.
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { fd })
    }

    /// Send one gratuitous ARP for every destination in the set, bound to
    /// the bond's interface. A failed send is logged and the burst
    /// continues.
    pub fn send_burst(&self, bond: &Bond, fdb: &FdbSet) {
        for dst in fdb.iter() {
            match self.send_garp(bond.ifindex, dst) {
                Ok(()) => {
                    debug!(
                        "Sent gratuitous ARP for {} via {}.{}",
                        dst.mac_str(),
                        bond.ifname,
                        dst.vlan
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to send gratuitous ARP for {} via {}.{}: {e}",
                        dst.mac_str(),
                        bond.ifname,
                        dst.vlan
                    );
                }
            }
        }
    }

    fn send_garp(&self, ifindex: i32, dst: &Dst) -> io::Result<()> {
        let (macs, vlan, arp) = frame(dst);

        // SAFETY: zero is a valid bit pattern for sockaddr_ll.
        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
        sll.sll_ifindex = ifindex;
        sll.sll_halen = 6;
        sll.sll_addr[..6].copy_from_slice(&MAC_BROADCAST);

        fn seg(bytes: &[u8]) -> libc::iovec {
            libc::iovec {
                iov_base: bytes.as_ptr() as *mut libc::c_void,
                iov_len: bytes.len(),
            }
        }

        let mut iov = [seg(macs.as_bytes()), seg(arp.as_bytes()), seg(&[])];
        let iovlen: usize = if dst.vlan != 0 {
            iov[1] = seg(vlan.as_bytes());
            iov[2] = seg(arp.as_bytes());
            3
        } else {
            2
        };

        // SAFETY: zero is a valid bit pattern for msghdr (and some libc
        // targets have private padding fields, so it cannot be built as a
        // struct literal).
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = (&raw mut sll).cast();
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        msg.msg_iov = iov.as_mut_ptr();
        msg.msg_iovlen = iovlen;

        // SAFETY: msg points at stack data that outlives the call.
        let rc = unsafe { libc::sendmsg(self.fd, &msg, 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for GarpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for GarpSocket {
    fn drop(&mut self) {
        // SAFETY: fd was returned by socket(2) and is closed exactly once.
        if unsafe { libc::close(self.fd) } < 0 {
            error!(
                "Failed to close ARP socket: {}",
                io::Error::last_os_error()
            );
        }
    }
}
