//! Synthetic netlink messages for unit tests.

use super::builder::MessageBuilder;
use super::link::{IfInfoMsg, ifla, ifla_bond, ifla_info};
use super::message::{MessageIter, NLM_F_MULTI, NlMsgType};
use super::neigh::{AF_BRIDGE, NdMsg, nda};

/// Everything a synthetic RTM_NEWLINK can carry.
#[derive(Debug, Default)]
pub(crate) struct LinkFixture<'a> {
    pub ifindex: i32,
    pub name: Option<&'a str>,
    pub master: Option<u32>,
    pub kind: Option<&'a str>,
    pub bond_mode: Option<u8>,
    pub event: Option<u32>,
}

impl LinkFixture<'_> {
    /// Full RTM_NEWLINK message bytes (header included), as the kernel
    /// would send on the multicast socket.
    pub(crate) fn message(&self) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWLINK, 0);
        builder.append(&IfInfoMsg::with_index(self.ifindex));
        if let Some(name) = self.name {
            builder.append_attr_str(ifla::IFLA_IFNAME, name);
        }
        if let Some(master) = self.master {
            builder.append_attr_u32(ifla::IFLA_MASTER, master);
        }
        if let Some(event) = self.event {
            builder.append_attr_u32(ifla::IFLA_EVENT, event);
        }
        if self.kind.is_some() || self.bond_mode.is_some() {
            let nest = builder.nest_start(ifla::IFLA_LINKINFO);
            if let Some(kind) = self.kind {
                builder.append_attr_str(ifla_info::IFLA_INFO_KIND, kind);
            }
            if let Some(mode) = self.bond_mode {
                let data = builder.nest_start(ifla_info::IFLA_INFO_DATA);
                builder.append_attr_u8(ifla_bond::IFLA_BOND_MODE, mode);
                builder.nest_end(data);
            }
            builder.nest_end(nest);
        }
        builder.finish()
    }

    /// Just the message payload (ifinfomsg + attributes).
    pub(crate) fn payload(&self) -> Vec<u8> {
        let msg = self.message();
        let (_, payload) = MessageIter::new(&msg).next().unwrap().unwrap();
        payload.to_vec()
    }
}

/// Payload of a synthetic RTM_NEWNEIGH bridge-FDB row.
pub(crate) fn neigh_payload(
    ifindex: i32,
    state: u16,
    lladdr: Option<[u8; 6]>,
    vlan: Option<u16>,
) -> Vec<u8> {
    let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWNEIGH, NLM_F_MULTI);
    builder.append(
        &NdMsg::new()
            .with_family(AF_BRIDGE)
            .with_ifindex(ifindex)
            .with_state(state),
    );
    if let Some(mac) = lladdr {
        builder.append_attr(nda::NDA_LLADDR, &mac);
    }
    if let Some(vlan) = vlan {
        builder.append_attr_u16(nda::NDA_VLAN, vlan);
    }

    let msg = builder.finish();
    let (_, payload) = MessageIter::new(&msg).next().unwrap().unwrap();
    payload.to_vec()
}
