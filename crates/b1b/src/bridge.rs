//! Forwarding-database acquisition for native Linux bridges.

use crate::bond::Bond;
use crate::error::{Error, Result};
use crate::fdb::{Dst, FdbSet, MAC_ZERO};
use crate::netlink::{Connection, NeighborMessage};

/// Dump the bridge's FDB and collect the destinations worth re-teaching.
pub async fn read_fdb(conn: &Connection, bond: &Bond) -> Result<FdbSet> {
    let rows = conn.dump_bridge_fdb(bond.brindex).await.map_err(|e| {
        Error::InvalidMessage(format!(
            "failed to get forwarding table for bridge: {}: {e}",
            bond.brname
        ))
    })?;

    let mut set = FdbSet::new();
    for row in &rows {
        collect(bond, row, &mut set);
    }
    Ok(set)
}

/// Filter one FDB row into the destination set.
///
/// Skipped: entries learned on the bond itself (the kernel already
/// re-announces the bond's own MAC), permanent entries, and rows without a
/// plausible MAC.
pub fn collect(bond: &Bond, row: &NeighborMessage, set: &mut FdbSet) {
    if row.ifindex() == bond.ifindex || row.is_permanent() {
        return;
    }
    let Some(mac) = row.lladdr else {
        return;
    };
    if mac == MAC_ZERO {
        return;
    }
    set.add(Dst::new(row.vlan.unwrap_or(0), mac), &bond.brname);
}
