//! Neighbor (RTM_NEWNEIGH) message parsing. With `ndm_family == AF_BRIDGE`
//! these messages are bridge forwarding-database rows.

use tracing::error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;

use super::attr::{AttrIter, get};

/// AF_BRIDGE address family (bridge FDB dumps).
pub const AF_BRIDGE: u8 = 7;

/// The NDA_* attributes this daemon cares about.
pub mod nda {
    pub const NDA_LLADDR: u16 = 2;
    pub const NDA_VLAN: u16 = 5;
    pub const NDA_MASTER: u16 = 9;
}

/// Neighbor states (NUD_*).
pub mod nud {
    /// Static entry, never aged out.
    pub const NUD_PERMANENT: u16 = 0x80;
}

/// Neighbor message header (mirrors struct ndmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NdMsg {
    /// Address family.
    pub ndm_family: u8,
    /// Padding.
    pub ndm_pad1: u8,
    /// Padding.
    pub ndm_pad2: u16,
    /// Interface index.
    pub ndm_ifindex: i32,
    /// Neighbor state (NUD_*).
    pub ndm_state: u16,
    /// Neighbor flags (NTF_*).
    pub ndm_flags: u8,
    /// Neighbor type.
    pub ndm_type: u8,
}

impl NdMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address family.
    pub fn with_family(mut self, family: u8) -> Self {
        self.ndm_family = family;
        self
    }

    /// Set the interface index.
    pub fn with_ifindex(mut self, ifindex: i32) -> Self {
        self.ndm_ifindex = ifindex;
        self
    }

    /// Set the neighbor state.
    pub fn with_state(mut self, state: u16) -> Self {
        self.ndm_state = state;
        self
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from the start of a message payload.
    ///
    /// As with links, the message's declared length covered this header;
    /// anything shorter is an impossible state and aborts.
    pub fn from_bytes(data: &[u8]) -> &Self {
        match Self::ref_from_prefix(data) {
            Ok((header, _)) => header,
            Err(_) => {
                error!(
                    "Neighbor message shorter than its header: {} of {} bytes",
                    data.len(),
                    Self::SIZE
                );
                panic!("neighbor message shorter than its header");
            }
        }
    }
}

/// An RTM_NEWNEIGH message, reduced to what an FDB row carries.
#[derive(Debug, Clone, Default)]
pub struct NeighborMessage {
    /// Fixed-size header.
    pub header: NdMsg,
    /// Link-layer address (NDA_LLADDR), when it is a 6-byte MAC.
    pub lladdr: Option<[u8; 6]>,
    /// VLAN ID (NDA_VLAN); absent means untagged.
    pub vlan: Option<u16>,
}

impl NeighborMessage {
    /// Get the interface index (the bridge port the entry was learned on).
    pub fn ifindex(&self) -> i32 {
        self.header.ndm_ifindex
    }

    /// Check if this is a permanent (static) entry.
    pub fn is_permanent(&self) -> bool {
        self.header.ndm_state & nud::NUD_PERMANENT != 0
    }

    /// Parse an RTM_NEWNEIGH payload (ndmsg followed by attributes).
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let header = *NdMsg::from_bytes(payload);

        let mut msg = NeighborMessage {
            header,
            ..Default::default()
        };

        for (attr_type, data) in AttrIter::new(&payload[NdMsg::SIZE..]) {
            match attr_type {
                nda::NDA_LLADDR => msg.lladdr = get::mac(data).ok(),
                nda::NDA_VLAN => msg.vlan = Some(get::u16_ne(data)?),
                _ => {}
            }
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::fixtures::neigh_payload;

    const NUD_REACHABLE: u16 = 0x02;

    #[test]
    fn parses_fdb_row() {
        let mac = [0x02, 0xaa, 0, 0, 0, 1];
        let payload = neigh_payload(9, NUD_REACHABLE, Some(mac), Some(10));
        let msg = NeighborMessage::from_bytes(&payload).unwrap();

        assert_eq!(msg.ifindex(), 9);
        assert_eq!(msg.lladdr, Some(mac));
        assert_eq!(msg.vlan, Some(10));
        assert!(!msg.is_permanent());
    }

    #[test]
    fn permanent_state_is_detected() {
        let payload = neigh_payload(9, nud::NUD_PERMANENT, Some([2; 6]), None);
        let msg = NeighborMessage::from_bytes(&payload).unwrap();
        assert!(msg.is_permanent());
        assert_eq!(msg.vlan, None);
    }

    #[test]
    fn short_lladdr_is_ignored() {
        // An entry without a usable MAC parses, but carries no lladdr.
        let payload = neigh_payload(9, NUD_REACHABLE, None, None);
        let msg = NeighborMessage::from_bytes(&payload).unwrap();
        assert_eq!(msg.lladdr, None);
    }

    #[test]
    #[should_panic(expected = "shorter than its header")]
    fn truncated_header_aborts() {
        let _ = NeighborMessage::from_bytes(&[0u8; 4]);
    }
}
