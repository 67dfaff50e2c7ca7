//! Link (RTM_NEWLINK) message parsing.

use tracing::error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;

use super::attr::{AttrIter, get};

/// The IFLA_* attributes this daemon cares about.
pub mod ifla {
    pub const IFLA_IFNAME: u16 = 3;
    pub const IFLA_MASTER: u16 = 10;
    pub const IFLA_LINKINFO: u16 = 18;
    pub const IFLA_EVENT: u16 = 44;
}

/// Nested IFLA_INFO_* attributes inside IFLA_LINKINFO.
pub mod ifla_info {
    pub const IFLA_INFO_KIND: u16 = 1;
    pub const IFLA_INFO_DATA: u16 = 2;
}

/// Nested IFLA_BOND_* attributes inside a bond's IFLA_INFO_DATA.
pub mod ifla_bond {
    pub const IFLA_BOND_MODE: u16 = 1;
}

/// IFLA_EVENT values.
pub mod ifla_event {
    /// A bonding failover promoted a new active slave.
    pub const BONDING_FAILOVER: u32 = 3;
}

/// Link message header (mirrors struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfInfoMsg {
    /// Address family (AF_UNSPEC for requests).
    pub ifi_family: u8,
    /// Padding.
    pub ifi_pad: u8,
    /// Device type (ARPHRD_*).
    pub ifi_type: u16,
    /// Interface index.
    pub ifi_index: i32,
    /// Device flags (IFF_*).
    pub ifi_flags: u32,
    /// Change mask.
    pub ifi_change: u32,
}

impl IfInfoMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new() -> Self {
        Self::default()
    }

    /// Header for a request targeting a specific interface index.
    pub fn with_index(ifindex: i32) -> Self {
        Self {
            ifi_index: ifindex,
            ..Self::default()
        }
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from the start of a message payload.
    ///
    /// The payload comes from a message whose declared length covered this
    /// header, so a shorter buffer is an impossible state under the kernel
    /// contract: it is logged and the process aborts.
    pub fn from_bytes(data: &[u8]) -> &Self {
        match Self::ref_from_prefix(data) {
            Ok((header, _)) => header,
            Err(_) => {
                error!(
                    "Link message shorter than its header: {} of {} bytes",
                    data.len(),
                    Self::SIZE
                );
                panic!("link message shorter than its header");
            }
        }
    }
}

/// Link type information from IFLA_LINKINFO.
#[derive(Debug, Clone, Default)]
pub struct LinkInfo {
    /// Link kind (e.g. "bond", "bridge", "openvswitch").
    pub kind: Option<String>,
    /// Raw kind-specific IFLA_INFO_DATA payload.
    pub data: Option<Vec<u8>>,
}

/// An RTM_NEWLINK message, reduced to the attributes the daemon reads.
#[derive(Debug, Clone, Default)]
pub struct LinkMessage {
    /// Fixed-size header.
    pub header: IfInfoMsg,
    /// Interface name (IFLA_IFNAME).
    pub name: Option<String>,
    /// Master device index (IFLA_MASTER).
    pub master: Option<u32>,
    /// Link state event (IFLA_EVENT), set on multicast notifications.
    pub event: Option<u32>,
    /// Link type info (IFLA_LINKINFO).
    pub link_info: Option<LinkInfo>,
}

impl LinkMessage {
    /// Get the interface index.
    pub fn ifindex(&self) -> i32 {
        self.header.ifi_index
    }

    /// Get the link kind from IFLA_LINKINFO, if present.
    pub fn kind(&self) -> Option<&str> {
        self.link_info.as_ref()?.kind.as_deref()
    }

    /// Get the bonding mode byte, if this link is a bond.
    ///
    /// IFLA_INFO_DATA is collected raw during parsing and only interpreted
    /// here once the kind is known to be a bond.
    pub fn bond_mode(&self) -> Option<u8> {
        let info = self.link_info.as_ref()?;
        if info.kind.as_deref() != Some("bond") {
            return None;
        }
        let data = info.data.as_deref()?;
        AttrIter::new(data).find_map(|(ty, payload)| {
            (ty == ifla_bond::IFLA_BOND_MODE)
                .then(|| get::u8(payload).ok())
                .flatten()
        })
    }

    /// Parse an RTM_NEWLINK payload (ifinfomsg followed by attributes).
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let header = *IfInfoMsg::from_bytes(payload);

        let mut msg = LinkMessage {
            header,
            ..Default::default()
        };

        for (attr_type, data) in AttrIter::new(&payload[IfInfoMsg::SIZE..]) {
            match attr_type {
                ifla::IFLA_IFNAME => msg.name = Some(get::string(data)?.to_string()),
                ifla::IFLA_MASTER => msg.master = Some(get::u32_ne(data)?),
                ifla::IFLA_EVENT => msg.event = Some(get::u32_ne(data)?),
                ifla::IFLA_LINKINFO => msg.link_info = Some(parse_link_info(data)),
                _ => {}
            }
        }

        Ok(msg)
    }
}

/// Parse the nested IFLA_LINKINFO attributes.
fn parse_link_info(data: &[u8]) -> LinkInfo {
    let mut info = LinkInfo::default();

    for (attr_type, payload) in AttrIter::new(data) {
        match attr_type {
            ifla_info::IFLA_INFO_KIND => {
                info.kind = get::string(payload).ok().map(str::to_string);
            }
            ifla_info::IFLA_INFO_DATA => {
                // The kernel puts IFLA_INFO_KIND ahead of IFLA_INFO_DATA;
                // data with no kind to attribute it to cannot be parsed.
                if info.kind.is_none() {
                    error!("Cannot parse interface data: interface type not set");
                    panic!("IFLA_INFO_DATA attribute precedes IFLA_INFO_KIND");
                }
                info.data = Some(payload.to_vec());
            }
            _ => {}
        }
    }

    info
}
