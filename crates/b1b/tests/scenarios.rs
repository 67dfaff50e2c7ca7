//! End-to-end seed scenarios, exercised at the parse/filter/encode level:
//! synthetic netlink buffers and OVS listings stand in for the kernel and
//! ovs-vswitchd, so no root or live sockets are needed.

use b1b::bond::{Bond, BridgeKind};
use b1b::bridge;
use b1b::daemon::mark_failover_events;
use b1b::fdb::{Dst, FdbSet};
use b1b::garp::frame_bytes;
use b1b::netlink::link::{ifla, ifla_event};
use b1b::netlink::message::NLM_F_MULTI;
use b1b::netlink::neigh::{AF_BRIDGE, nda, nud};
use b1b::netlink::{IfInfoMsg, MessageBuilder, MessageIter, NdMsg, NeighborMessage, NlMsgType};
use b1b::ovs;

const NUD_REACHABLE: u16 = 0x02;

fn bond0_native() -> Bond {
    Bond {
        ifname: "bond0".into(),
        ifindex: 7,
        brindex: 3,
        brname: "br0".into(),
        bridge: BridgeKind::Native,
        failover: false,
    }
}

/// Build one RTM_NEWNEIGH bridge-FDB row the way the kernel would frame it.
fn fdb_row(ifindex: i32, state: u16, mac: [u8; 6], vlan: Option<u16>) -> NeighborMessage {
    let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWNEIGH, NLM_F_MULTI);
    builder.append(
        &NdMsg::new()
            .with_family(AF_BRIDGE)
            .with_ifindex(ifindex)
            .with_state(state),
    );
    builder.append_attr(nda::NDA_LLADDR, &mac);
    if let Some(vlan) = vlan {
        builder.append_attr_u16(nda::NDA_VLAN, vlan);
    }

    let msg = builder.finish();
    let (_, payload) = MessageIter::new(&msg).next().unwrap().unwrap();
    NeighborMessage::from_bytes(payload).unwrap()
}

/// Build one RTM_NEWLINK failover notification.
fn failover_msg(ifindex: i32) -> Vec<u8> {
    let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWLINK, 0);
    builder.append(&IfInfoMsg::with_index(ifindex));
    builder.append_attr_u32(ifla::IFLA_EVENT, ifla_event::BONDING_FAILOVER);
    builder.finish()
}

#[test]
fn native_bridge_failover_sends_two_frames() {
    // A dynamic untagged entry, a dynamic tagged entry, a permanent entry,
    // and the bond's own entry. Only the first two produce frames.
    let bond = bond0_native();
    let mac_untagged = [0x02, 0xaa, 0, 0, 0, 0x01];
    let mac_tagged = [0x02, 0xaa, 0, 0, 0, 0x02];

    let rows = [
        fdb_row(9, NUD_REACHABLE, mac_untagged, None),
        fdb_row(9, NUD_REACHABLE, mac_tagged, Some(10)),
        fdb_row(9, nud::NUD_PERMANENT, [0x02, 0xaa, 0, 0, 0, 0x03], None),
        fdb_row(bond.ifindex, NUD_REACHABLE, [0x02, 0xbb, 0, 0, 0, 0xff], None),
    ];

    let mut set = FdbSet::new();
    for row in &rows {
        bridge::collect(&bond, row, &mut set);
    }

    let frames: Vec<Vec<u8>> = set.iter().map(frame_bytes).collect();
    assert_eq!(frames.len(), 2);

    // Untagged 42-byte frame first (key order), sourced from its MAC.
    assert_eq!(frames[0].len(), 42);
    assert_eq!(&frames[0][6..12], &mac_untagged);
    assert_eq!(&frames[0][22..28], &mac_untagged); // sha

    // Tagged 46-byte frame, VID 10.
    assert_eq!(frames[1].len(), 46);
    assert_eq!(&frames[1][6..12], &mac_tagged);
    assert_eq!(&frames[1][12..14], &[0x81, 0x00]);
    assert_eq!(&frames[1][14..16], &10u16.to_be_bytes());
    assert_eq!(&frames[1][26..32], &mac_tagged); // sha, past the tag
}

#[test]
fn ovs_bridge_failover_sends_one_tagged_frame() {
    // Resolve the bridge from dpif/show, then read fdb/show. The LOCAL row
    // and the bond's own port are skipped; only the vlan-20 entry survives.
    let dpif = "\
system@ovs-system: hit:10 missed:2
  br-int:
    bond0 5/3: (system)
    br-int 65534/4: (internal)";

    let (brname, ofport) = ovs::find_bridge_port(dpif, "bond0").unwrap();
    assert_eq!(brname, "br-int");
    assert_eq!(ofport, 5);

    let fdb = "\
 port  VLAN  MAC                Age
LOCAL     0  02:11:22:33:44:aa    1
    5     0  02:11:22:33:44:bb    7
    9    20  02:11:22:33:44:cc    3";

    let mut set = FdbSet::new();
    ovs::collect_fdb(fdb, ofport, &brname, &mut set).unwrap();

    let frames: Vec<Vec<u8>> = set.iter().map(frame_bytes).collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), 46);
    assert_eq!(&frames[0][14..16], &20u16.to_be_bytes());
    assert_eq!(&frames[0][6..12], &[0x02, 0x11, 0x22, 0x33, 0x44, 0xcc]);
}

#[test]
fn repeated_failover_events_coalesce_into_one_burst() {
    // Two IFLA_EVENT notifications for bond2 in one poll cycle leave one
    // flag set, so the service pass visits the bond exactly once.
    let mut bonds = vec![
        Bond {
            ifname: "bond1".into(),
            ifindex: 4,
            ..bond0_native()
        },
        Bond {
            ifname: "bond2".into(),
            ifindex: 7,
            ..bond0_native()
        },
    ];

    let mut datagram = failover_msg(7);
    datagram.extend(failover_msg(7));
    mark_failover_events(&mut bonds, &datagram).unwrap();

    let flagged: Vec<&str> = bonds
        .iter()
        .filter(|b| b.failover)
        .map(|b| b.ifname.as_str())
        .collect();
    assert_eq!(flagged, vec!["bond2"]);
}

#[test]
fn burst_order_is_deterministic() {
    // Destinations are visited in 8-byte key order regardless of insertion
    // order.
    let mut set = FdbSet::new();
    set.add(Dst::new(30, [2; 6]), "br0");
    set.add(Dst::new(0, [9; 6]), "br0");
    set.add(Dst::new(0, [1; 6]), "br0");

    let order: Vec<(u16, u8)> = set.iter().map(|d| (d.vlan, d.mac[0])).collect();
    assert_eq!(order, vec![(0, 1), (0, 9), (30, 2)]);
}
