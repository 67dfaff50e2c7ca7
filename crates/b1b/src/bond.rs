//! Bond inventory: validate the bonds this daemon manages and resolve each
//! one's master bridge.
//!
//! Two discovery modes. With names on the command line, every validation
//! failure is fatal. With none, all links are dumped and anything that is
//! not a mode-1 bond on a usable bridge is quietly dropped.

use tracing::debug;

use crate::error::{Error, Result};
use crate::netlink::{Connection, LinkMessage};
use crate::ovs::OvsClient;

/// The active-backup bonding mode byte.
pub const BOND_MODE_ACTIVE_BACKUP: u8 = 1;

/// What kind of bridge a bond is enslaved to, resolved at inventory time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// A native kernel bridge; the FDB comes from an RTM_GETNEIGH dump.
    Native,
    /// An OVS bridge; the FDB comes from ovs-vswitchd over JSON-RPC.
    Ovs {
        /// The bond's OpenFlow port number on the bridge.
        ofport: u32,
    },
}

/// One managed bond and its resolved master bridge.
#[derive(Debug, Clone)]
pub struct Bond {
    /// Bond interface name.
    pub ifname: String,
    /// Bond interface index.
    pub ifindex: i32,
    /// Interface index of the bridge whose FDB is dumped on failover. For
    /// OVS this is the logical bridge, not the datapath device.
    pub brindex: i32,
    /// Bridge name.
    pub brname: String,
    /// Which FDB reader to use.
    pub bridge: BridgeKind,
    /// Set while a failover event for this bond is pending in the current
    /// poll cycle.
    pub failover: bool,
}

/// Validate that a link message describes a mode-1 bond with a master.
///
/// Returns the reason for rejection, phrased for a log line or a fatal
/// error.
fn check_link(link: &LinkMessage) -> std::result::Result<(), String> {
    match link.kind() {
        None => return Err("interface type not set".into()),
        Some("bond") => {}
        Some(kind) => return Err(format!("invalid interface type ({kind})")),
    }

    let Some(mode) = link.bond_mode() else {
        return Err("interface bonding mode not set".into());
    };
    if mode != BOND_MODE_ACTIVE_BACKUP {
        return Err(format!("invalid bonding mode ({mode})"));
    }

    if link.master.unwrap_or(0) == 0 {
        return Err("interface master not set".into());
    }

    Ok(())
}

/// The name used in logs before IFLA_IFNAME has been parsed.
fn placeholder_name(link: &LinkMessage) -> String {
    link.name
        .clone()
        .unwrap_or_else(|| format!("(index {})", link.ifindex()))
}

/// Resolve a bond's master: bridge name, kind, and the index of the bridge
/// whose FDB will be dumped.
///
/// Netlink and OVS failures are fatal in both discovery modes. The
/// [`Error::MasterName`] and [`Error::UnusableMaster`] variants are the
/// only soft rejections; auto-detection drops such candidates.
async fn resolve_master(
    conn: &Connection,
    ovs: &mut OvsClient,
    ifname: &str,
    brindex: i32,
) -> Result<(String, BridgeKind, i32)> {
    let link = conn.link_by_index(brindex).await.map_err(|e| {
        Error::InvalidMessage(format!("failed to get master info for bond: {ifname}: {e}"))
    })?;

    let Some(brname) = link.name.clone() else {
        return Err(Error::MasterName {
            bond: ifname.to_string(),
        });
    };

    match link.kind() {
        Some("bridge") => Ok((brname, BridgeKind::Native, brindex)),
        Some("openvswitch") => {
            // The kernel-visible master is the OVS datapath device; ask
            // ovs-vswitchd for the logical bridge and the bond's OF port.
            ovs.bridge_info(conn, ifname).await
        }
        _ => Err(Error::UnusableMaster {
            bond: ifname.to_string(),
            master: brname,
        }),
    }
}

fn finish_inventory(mut bonds: Vec<Bond>) -> Vec<Bond> {
    bonds.sort_by_key(|b| b.ifindex);
    bonds.dedup_by(|a, b| {
        if a.ifindex == b.ifindex {
            debug!("Bond listed twice: {}", a.ifname);
            true
        } else {
            false
        }
    });
    bonds
}

/// Build the inventory from bond names given on the command line. Any
/// interface that is not a usable mode-1 bond is fatal.
pub async fn parse_bonds(
    conn: &Connection,
    ovs: &mut OvsClient,
    names: &[String],
) -> Result<Vec<Bond>> {
    let mut bonds = Vec::with_capacity(names.len());

    for name in names {
        debug!("Getting info for bond: {name}");

        let link = conn.link_by_name(name).await.map_err(|e| {
            Error::InvalidMessage(format!("failed to get interface info: {name}: {e}"))
        })?;

        let ifname = placeholder_name(&link);
        if ifname != *name {
            return Err(Error::InvalidMessage(format!(
                "got interface info with wrong name: {name}: {ifname}"
            )));
        }

        check_link(&link).map_err(|reason| Error::InvalidBond {
            name: name.clone(),
            reason,
        })?;

        let master = link.master.unwrap_or(0) as i32;
        let (brname, bridge, brindex) = resolve_master(conn, ovs, &ifname, master).await?;

        bonds.push(Bond {
            ifname,
            ifindex: link.ifindex(),
            brindex,
            brname,
            bridge,
            failover: false,
        });
    }

    Ok(finish_inventory(bonds))
}

/// Build the inventory by dumping all links and keeping every mode-1 bond
/// whose master is a native or OVS bridge. Fails if nothing qualifies.
pub async fn detect_bonds(conn: &Connection, ovs: &mut OvsClient) -> Result<Vec<Bond>> {
    let links = conn
        .dump_links()
        .await
        .map_err(|e| Error::InvalidMessage(format!("error while auto-detecting bonds: {e}")))?;

    let mut bonds = Vec::new();

    for link in links {
        let ifname = placeholder_name(&link);

        if let Err(reason) = check_link(&link) {
            debug!("Ignoring interface: {ifname}: {reason}");
            continue;
        }
        debug!("Detected mode 1 bond with master: {ifname}");

        let master = link.master.unwrap_or(0) as i32;
        match resolve_master(conn, ovs, &ifname, master).await {
            Ok((brname, bridge, brindex)) => bonds.push(Bond {
                ifname,
                ifindex: link.ifindex(),
                brindex,
                brname,
                bridge,
                failover: false,
            }),
            Err(e @ (Error::MasterName { .. } | Error::UnusableMaster { .. })) => {
                debug!("Ignoring interface: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    if bonds.is_empty() {
        return Err(Error::NoBonds);
    }

    Ok(finish_inventory(bonds))
}
