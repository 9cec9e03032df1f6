//! rtnetlink connection with dump handling.

use super::addr::{AddressMessage, IfAddrMsg};
use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{MessageIter, NLM_F_DUMP, NLM_F_REQUEST, NlMsgType, Payload};
use super::socket::NetlinkSocket;
use crate::util::ifname;

/// rtnetlink connection.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Open a new routing connection.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }

    /// Send a dump request and collect the payload of every reply message.
    pub async fn dump(&self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let mut responses = Vec::new();

        loop {
            let data = self.socket.recv_msg().await?;

            for message in MessageIter::new(&data) {
                let (header, payload) = message?;
                if header.nlmsg_seq != seq {
                    continue;
                }

                match payload {
                    Payload::Data(body) => responses.push(body.to_vec()),
                    Payload::Ack => {}
                    Payload::Error(errno) => return Err(Error::from_errno(errno)),
                    Payload::Done => return Ok(responses),
                }
            }
        }
    }

    /// Dump the addresses of one family assigned to `ifindex`.
    pub async fn get_addresses_by_index(
        &self,
        family: u8,
        ifindex: u32,
    ) -> Result<Vec<AddressMessage>> {
        let mut builder = dump_request(NlMsgType::RTM_GETADDR);
        builder.append_bytes(IfAddrMsg::for_family(family).as_bytes());

        let mut addresses = Vec::new();
        for payload in self.dump(builder).await? {
            let msg = AddressMessage::from_bytes(&payload)?;
            if msg.ifindex() == ifindex {
                addresses.push(msg);
            }
        }
        Ok(addresses)
    }

    /// Resolve an interface name to its index.
    pub fn link_index(&self, name: &str) -> Result<u32> {
        ifname::name_to_index(name).map_err(|_| Error::InterfaceNotFound {
            name: name.to_string(),
        })
    }
}

/// Helper to build a dump request.
pub fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}
