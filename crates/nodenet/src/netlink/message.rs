//! `nlmsghdr` framing and reply classification.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

/// Messages and their payloads start on 4-byte boundaries.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
/// `NLM_F_ROOT | NLM_F_MATCH`.
pub const NLM_F_DUMP: u16 = 0x300;

/// Message types used here.
pub struct NlMsgType;

impl NlMsgType {
    pub const ERROR: u16 = 2;
    pub const DONE: u16 = 3;
    pub const RTM_NEWADDR: u16 = 20;
    pub const RTM_GETADDR: u16 = 22;
}

/// `struct nlmsghdr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Header for an empty message; the builder fixes up the length.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            ..Default::default()
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(header, _)| header)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// What one message of a reply means for the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// A dump entry; the bytes after the header.
    Data(&'a [u8]),
    /// `NLMSG_ERROR` carrying 0.
    Ack,
    /// `NLMSG_ERROR` carrying a negative errno.
    Error(i32),
    /// `NLMSG_DONE`: the dump is complete.
    Done,
}

impl<'a> Payload<'a> {
    fn classify(header: &NlMsgHdr, body: &'a [u8]) -> Result<Self> {
        Ok(match header.nlmsg_type {
            NlMsgType::DONE => Payload::Done,
            NlMsgType::ERROR => {
                let code = body
                    .get(..4)
                    .and_then(|b| <[u8; 4]>::try_from(b).ok())
                    .map(i32::from_ne_bytes)
                    .ok_or(Error::Truncated {
                        expected: 4,
                        actual: body.len(),
                    })?;
                if code == 0 {
                    Payload::Ack
                } else {
                    Payload::Error(code)
                }
            }
            _ => Payload::Data(body),
        })
    }
}

/// Messages packed in one datagram. A bad length ends the iteration after
/// reporting it.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<(&'a NlMsgHdr, Payload<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }
        let data = std::mem::take(&mut self.data);

        let header = match NlMsgHdr::from_bytes(data) {
            Ok(header) => header,
            Err(e) => return Some(Err(e)),
        };
        let len = header.nlmsg_len as usize;
        if !(NLMSG_HDRLEN..=data.len()).contains(&len) {
            return Some(Err(Error::InvalidMessage(format!(
                "message length {} outside {}..={}",
                len,
                NLMSG_HDRLEN,
                data.len()
            ))));
        }

        self.data = data.get(nlmsg_align(len)..).unwrap_or_default();
        Some(Payload::classify(header, &data[NLMSG_HDRLEN..len]).map(|payload| (header, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(msg_type: u16, seq: u32, body: &[u8]) -> Vec<u8> {
        let mut hdr = NlMsgHdr::new(msg_type, NLM_F_MULTI);
        hdr.nlmsg_len = (NLMSG_HDRLEN + body.len()) as u32;
        hdr.nlmsg_seq = seq;

        let mut buf = hdr.as_bytes().to_vec();
        buf.extend_from_slice(body);
        buf.resize(nlmsg_align(buf.len()), 0);
        buf
    }

    #[test]
    fn test_align() {
        assert_eq!(nlmsg_align(0), 0);
        assert_eq!(nlmsg_align(1), 4);
        assert_eq!(nlmsg_align(16), 16);
        assert_eq!(NLMSG_HDRLEN, 16);
    }

    #[test]
    fn test_iter_classifies() {
        let mut buf = message(NlMsgType::RTM_NEWADDR, 3, &[1, 2, 3]);
        buf.extend(message(NlMsgType::ERROR, 3, &0i32.to_ne_bytes()));
        buf.extend(message(NlMsgType::ERROR, 3, &(-19i32).to_ne_bytes()));
        buf.extend(message(NlMsgType::DONE, 3, &[0; 4]));

        let msgs: Vec<_> = MessageIter::new(&buf)
            .map(|m| m.map(|(_, payload)| payload))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            msgs,
            vec![
                Payload::Data(&[1, 2, 3]),
                Payload::Ack,
                Payload::Error(-19),
                Payload::Done,
            ]
        );
    }

    #[test]
    fn test_iter_bad_length() {
        let mut buf = message(NlMsgType::RTM_NEWADDR, 1, &[]);
        buf[0] = 64;
        let mut iter = MessageIter::new(&buf);
        assert!(matches!(iter.next(), Some(Err(Error::InvalidMessage(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_truncated_error_message() {
        let buf = message(NlMsgType::ERROR, 1, &[0, 0]);
        assert!(matches!(
            MessageIter::new(&buf).next(),
            Some(Err(Error::Truncated { .. }))
        ));
    }
}
