//! Attribute stream and message builders.

use super::attr::{NLA_F_NESTED, NlAttr, nla_align};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};

/// An open nested attribute; hand it back to [`AttrBuilder::nest_end`].
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct NestToken {
    offset: usize,
}

/// Bare attribute stream, such as the `IFLA_INFO_DATA` payload of a link
/// kind. Every record is padded to 4 bytes as it is written.
#[derive(Debug, Clone, Default)]
pub struct AttrBuilder {
    buf: Vec<u8>,
}

impl AttrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn pad(&mut self) {
        self.buf.resize(nla_align(self.buf.len()), 0);
    }

    pub fn append_attr(&mut self, attr_type: u16, data: &[u8]) {
        self.buf
            .extend_from_slice(NlAttr::new(attr_type, data.len()).as_bytes());
        self.buf.extend_from_slice(data);
        self.pad();
    }

    pub fn append_attr_u8(&mut self, attr_type: u16, value: u8) {
        self.append_attr(attr_type, &[value]);
    }

    pub fn append_attr_u16(&mut self, attr_type: u16, value: u16) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    pub fn append_attr_u32(&mut self, attr_type: u16, value: u32) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    /// Network byte order, e.g. `IFLA_VLAN_PROTOCOL`.
    pub fn append_attr_u16_be(&mut self, attr_type: u16, value: u16) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// NUL-terminated.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) {
        let data: Vec<u8> = value.bytes().chain([0]).collect();
        self.append_attr(attr_type, &data);
    }

    /// Open a nested attribute. Its length is patched in by `nest_end`.
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        let token = NestToken {
            offset: self.buf.len(),
        };
        self.buf
            .extend_from_slice(NlAttr::new(attr_type | NLA_F_NESTED, 0).as_bytes());
        token
    }

    pub fn nest_end(&mut self, token: NestToken) {
        let len = (self.buf.len() - token.offset) as u16;
        self.buf[token.offset..token.offset + 2].copy_from_slice(&len.to_ne_bytes());
        self.pad();
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// One netlink request: a header plus a body of family header and
/// attributes.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    header: NlMsgHdr,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            header: NlMsgHdr::new(msg_type, flags),
            body: Vec::new(),
        }
    }

    /// Append a fixed family header (`ifaddrmsg`, `ifinfomsg`, ...).
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
        self.body.resize(nlmsg_align(self.body.len()), 0);
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.header.nlmsg_seq = seq;
    }

    pub fn set_pid(&mut self, pid: u32) {
        self.header.nlmsg_pid = pid;
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.header.nlmsg_len = (NLMSG_HDRLEN + self.body.len()) as u32;

        let mut msg = Vec::with_capacity(NLMSG_HDRLEN + self.body.len());
        msg.extend_from_slice(self.header.as_bytes());
        msg.resize(NLMSG_HDRLEN, 0);
        msg.extend_from_slice(&self.body);
        msg
    }
}
