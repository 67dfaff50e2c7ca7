//! Bonding mode-1 bridge helper.
//!
//! Linux active-backup bonding (mode 1) announces only the bond's own MAC
//! after a failover. When the bond is enslaved to a bridge, every other
//! station the bridge has learned through the failed slave stays pointed at
//! the old path until the upstream switches age it out. This crate watches
//! for failover events and closes that gap: on each one it reads the
//! master bridge's forwarding database and emits a gratuitous ARP for every
//! non-local (VLAN, MAC) pair, re-teaching the switches within
//! milliseconds.
//!
//! Both native kernel bridges (via an RTM_GETNEIGH dump) and Open vSwitch
//! bridges (via ovs-vswitchd's JSON-RPC control socket) are supported.
//!
//! # Example
//!
//! ```ignore
//! use b1b::Daemon;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> b1b::Result<()> {
//!     // Empty slice: auto-detect every mode-1 bond on a usable bridge.
//!     let mut daemon = Daemon::start(&[]).await?;
//!     daemon.run().await
//! }
//! ```

pub mod bond;
pub mod bridge;
pub mod daemon;
pub mod error;
pub mod fdb;
pub mod garp;
pub mod netlink;
pub mod ovs;

pub use bond::{Bond, BridgeKind};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use fdb::{Dst, FdbSet};
