//! Route netlink plumbing: sockets, message framing, attribute parsing,
//! and the two message shapes the daemon consumes (links and bridge-FDB
//! neighbor rows).

pub mod attr;
mod builder;
pub mod connection;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod link;
pub mod message;
pub mod neigh;
mod socket;

pub use attr::{AttrIter, NlAttr};
pub use builder::{MessageBuilder, NestToken};
pub use connection::Connection;
pub use link::{IfInfoMsg, LinkMessage};
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgHdr, NlMsgType};
pub use neigh::{NdMsg, NeighborMessage};
pub use socket::{NetlinkSocket, RECV_BUF_SIZE, RTNLGRP_LINK};
