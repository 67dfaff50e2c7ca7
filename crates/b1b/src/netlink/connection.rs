//! Request/response handling on the route netlink socket.

use crate::error::{Error, Result};

use super::builder::MessageBuilder;
use super::link::{IfInfoMsg, LinkMessage, ifla};
use super::message::{MessageIter, NLM_F_DUMP, NLM_F_REQUEST, NlMsgError, NlMsgType};
use super::neigh::{AF_BRIDGE, NdMsg, NeighborMessage, nda};
use super::socket::NetlinkSocket;

/// Synchronous request socket with kernel strict checking enabled.
///
/// Every exchange is send-then-receive; the sequence number ties replies to
/// the outstanding request.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Open the request socket.
    pub fn open() -> Result<Self> {
        let socket = NetlinkSocket::open()?;
        socket.set_strict_checking(true)?;
        Ok(Self { socket })
    }

    /// Send a request and return the single reply message as
    /// `(type, payload)`. Kernel NLMSG_ERROR replies become
    /// [`Error::Kernel`].
    async fn send_request(&self, mut builder: MessageBuilder) -> Result<(u16, Vec<u8>)> {
        let seq = self.prepare(&mut builder);
        self.socket.send(&builder.finish()).await?;

        let data = self.socket.recv().await?;
        for item in MessageIter::new(&data) {
            let (header, payload) = item?;
            if header.nlmsg_seq != seq {
                continue;
            }
            if header.is_error() {
                let err = NlMsgError::from_bytes(payload)?;
                if !err.is_ack() {
                    return Err(Error::from_errno(err.error));
                }
                continue;
            }
            return Ok((header.nlmsg_type, payload.to_vec()));
        }

        Err(Error::InvalidMessage("empty netlink reply".into()))
    }

    /// Send a dump request and collect every reply message as
    /// `(type, payload)` pairs.
    ///
    /// The reply stream ends at a DONE message, or at the first message
    /// without the multipart flag.
    async fn send_dump(&self, mut builder: MessageBuilder) -> Result<Vec<(u16, Vec<u8>)>> {
        let seq = self.prepare(&mut builder);
        self.socket.send(&builder.finish()).await?;

        let mut messages = Vec::new();
        'recv: loop {
            let data = self.socket.recv().await?;
            for item in MessageIter::new(&data) {
                let (header, payload) = item?;
                if header.nlmsg_seq != seq {
                    continue;
                }
                if header.is_error() {
                    let err = NlMsgError::from_bytes(payload)?;
                    if !err.is_ack() {
                        return Err(Error::from_errno(err.error));
                    }
                    continue;
                }
                if header.is_done() {
                    break 'recv;
                }
                let multi = header.is_multi();
                messages.push((header.nlmsg_type, payload.to_vec()));
                if !multi {
                    break 'recv;
                }
            }
        }

        Ok(messages)
    }

    fn prepare(&self, builder: &mut MessageBuilder) -> u32 {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());
        seq
    }

    /// Look up one link by name.
    pub async fn link_by_name(&self, name: &str) -> Result<LinkMessage> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST);
        builder.append(&IfInfoMsg::new());
        builder.append_attr_str(ifla::IFLA_IFNAME, name);
        self.request_link(builder).await
    }

    /// Look up one link by interface index.
    pub async fn link_by_index(&self, ifindex: i32) -> Result<LinkMessage> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST);
        builder.append(&IfInfoMsg::with_index(ifindex));
        self.request_link(builder).await
    }

    async fn request_link(&self, builder: MessageBuilder) -> Result<LinkMessage> {
        let (msg_type, payload) = self.send_request(builder).await?;
        if msg_type != NlMsgType::RTM_NEWLINK {
            return Err(Error::InvalidMessage(format!(
                "unexpected reply type to RTM_GETLINK: {}",
                msg_type
            )));
        }
        LinkMessage::from_bytes(&payload)
    }

    /// Dump every link on the host.
    pub async fn dump_links(&self) -> Result<Vec<LinkMessage>> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP);
        builder.append(&IfInfoMsg::new());

        let mut links = Vec::new();
        for (msg_type, payload) in self.send_dump(builder).await? {
            if msg_type != NlMsgType::RTM_NEWLINK {
                continue;
            }
            links.push(LinkMessage::from_bytes(&payload)?);
        }
        Ok(links)
    }

    /// Dump the forwarding database of the bridge with index `brindex`.
    pub async fn dump_bridge_fdb(&self, brindex: i32) -> Result<Vec<NeighborMessage>> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETNEIGH, NLM_F_REQUEST | NLM_F_DUMP);
        builder.append(&NdMsg::new().with_family(AF_BRIDGE));
        builder.append_attr_u32(nda::NDA_MASTER, brindex as u32);

        let mut rows = Vec::new();
        for (msg_type, payload) in self.send_dump(builder).await? {
            if msg_type != NlMsgType::RTM_NEWNEIGH {
                continue;
            }
            rows.push(NeighborMessage::from_bytes(&payload)?);
        }
        Ok(rows)
    }
}
