//! The global session and the failover event loop.

use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info};

use crate::bond::{Bond, BridgeKind};
use crate::bridge;
use crate::error::Result;
use crate::fdb::FdbSet;
use crate::garp::GarpSocket;
use crate::netlink::link::ifla_event;
use crate::netlink::{Connection, LinkMessage, MessageIter, NetlinkSocket, NlMsgType, RTNLGRP_LINK};
use crate::ovs::OvsClient;

/// Everything the daemon owns: the sockets, the lazy OVS client, and the
/// bond inventory (sorted strictly ascending by ifindex).
///
/// Fields drop in declaration order: the OVS socket first, then the ARP
/// socket, the netlink sockets, and finally the inventory.
pub struct Daemon {
    ovs: OvsClient,
    garp: GarpSocket,
    conn: Connection,
    events: NetlinkSocket,
    bonds: Vec<Bond>,
}

impl Daemon {
    /// Open every socket and build the bond inventory. With `names` empty,
    /// bonds are auto-detected; otherwise each name must validate.
    pub async fn start(names: &[String]) -> Result<Self> {
        let conn = Connection::open()?;

        let mut events = NetlinkSocket::open()?;
        events.subscribe(RTNLGRP_LINK)?;

        let garp = GarpSocket::open()?;
        let mut ovs = OvsClient::new();

        let bonds = if names.is_empty() {
            crate::bond::detect_bonds(&conn, &mut ovs).await?
        } else {
            crate::bond::parse_bonds(&conn, &mut ovs, names).await?
        };

        for bond in &bonds {
            info!(
                "Managing bond {} (bridge {})",
                bond.ifname, bond.brname
            );
        }

        Ok(Self {
            ovs,
            garp,
            conn,
            events,
            bonds,
        })
    }

    /// The bond inventory, in service order.
    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    /// Run until SIGTERM or SIGINT.
    ///
    /// Each cycle absorbs every queued link-change message before any GARP
    /// is sent, so one burst covers the union of events observed in the
    /// cycle.
    pub async fn run(&mut self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        info!("Ready");

        loop {
            let datagrams = tokio::select! {
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
                result = self.events.drain() => result?,
            };
            self.process_cycle(&datagrams).await?;
        }

        info!("Exiting");
        Ok(())
    }

    /// One poll cycle: mark affected bonds, then service them in inventory
    /// order.
    async fn process_cycle(&mut self, datagrams: &[Vec<u8>]) -> Result<()> {
        for bond in &mut self.bonds {
            bond.failover = false;
        }

        let mut parse_error = false;
        for datagram in datagrams {
            if let Err(e) = mark_failover_events(&mut self.bonds, datagram) {
                // At most one log line per cycle; a storm of unparseable
                // messages is one problem, not many.
                if !parse_error {
                    parse_error = true;
                    error!("Failed to parse netlink message(s): {e}");
                }
            }
        }

        for i in 0..self.bonds.len() {
            if !self.bonds[i].failover {
                continue;
            }
            // Clone the record so the FDB readers can borrow the session.
            let bond = self.bonds[i].clone();
            let fdb = self.read_fdb(&bond).await?;
            self.garp.send_burst(&bond, &fdb);
        }

        Ok(())
    }

    async fn read_fdb(&mut self, bond: &Bond) -> Result<FdbSet> {
        debug!(
            "Sending gratuitous ARPs for {} via {}",
            bond.brname, bond.ifname
        );
        match bond.bridge {
            BridgeKind::Native => bridge::read_fdb(&self.conn, bond).await,
            BridgeKind::Ovs { ofport } => self.ovs.read_fdb(&bond.brname, ofport).await,
        }
    }
}

/// Scan one multicast datagram for bonding-failover events and flag the
/// matching bonds. Repeat events for a bond within a cycle coalesce into
/// one flag.
pub fn mark_failover_events(bonds: &mut [Bond], datagram: &[u8]) -> Result<()> {
    for item in MessageIter::new(datagram) {
        let (header, payload) = item?;
        if header.nlmsg_type != NlMsgType::RTM_NEWLINK {
            continue;
        }

        let link = LinkMessage::from_bytes(payload)?;
        let Ok(i) = bonds.binary_search_by_key(&link.ifindex(), |b| b.ifindex) else {
            continue;
        };

        if link.event == Some(ifla_event::BONDING_FAILOVER) {
            if bonds[i].failover {
                debug!("Duplicate failover event: {}", bonds[i].ifname);
            } else {
                bonds[i].failover = true;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::fixtures::LinkFixture;

    fn inventory() -> Vec<Bond> {
        [("bond1", 4), ("bond2", 7)]
            .into_iter()
            .map(|(name, ifindex)| Bond {
                ifname: name.into(),
                ifindex,
                brindex: 2,
                brname: "br0".into(),
                bridge: BridgeKind::Native,
                failover: false,
            })
            .collect()
    }

    fn failover_msg(ifindex: i32) -> Vec<u8> {
        LinkFixture {
            ifindex,
            event: Some(ifla_event::BONDING_FAILOVER),
            ..Default::default()
        }
        .message()
    }

    #[test]
    fn marks_only_the_affected_bond() {
        let mut bonds = inventory();
        mark_failover_events(&mut bonds, &failover_msg(7)).unwrap();
        assert!(!bonds[0].failover);
        assert!(bonds[1].failover);
    }

    #[test]
    fn duplicate_events_coalesce() {
        // Two failover messages in one cycle leave a single flag set, so
        // the bond is serviced exactly once.
        let mut bonds = inventory();
        let mut datagram = failover_msg(7);
        datagram.extend(failover_msg(7));
        mark_failover_events(&mut bonds, &datagram).unwrap();
        assert!(bonds[1].failover);
        assert_eq!(bonds.iter().filter(|b| b.failover).count(), 1);
    }

    #[test]
    fn unknown_interfaces_are_ignored() {
        let mut bonds = inventory();
        mark_failover_events(&mut bonds, &failover_msg(99)).unwrap();
        assert!(bonds.iter().all(|b| !b.failover));
    }

    #[test]
    fn other_events_do_not_mark() {
        let mut bonds = inventory();
        let datagram = LinkFixture {
            ifindex: 7,
            event: Some(1), // reboot notification
            ..Default::default()
        }
        .message();
        mark_failover_events(&mut bonds, &datagram).unwrap();
        assert!(!bonds[1].failover);
    }
}
