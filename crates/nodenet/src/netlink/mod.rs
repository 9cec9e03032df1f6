//! Netlink framing and the rtnetlink connection.
//!
//! The attribute codec ([`attr`], [`builder`]) is pure and used by the link
//! kind codecs. The socket side ([`socket`], [`connection`], [`addr`]) only
//! backs the address dump the DHCPv6 operator needs before soliciting.

pub mod addr;
pub mod attr;
pub mod builder;
pub mod connection;
pub mod error;
pub mod message;
pub mod socket;

pub use addr::AddressMessage;
pub use attr::{AttrIter, NlAttr, StrictAttrIter};
pub use builder::{AttrBuilder, MessageBuilder, NestToken};
pub use connection::Connection;
pub use error::{Error, Result};
pub use socket::NetlinkSocket;
