//! Address messages (RTM_NEWADDR) as returned by an address dump.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use winnow::binary::le_u16;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{get, nla_align};
use super::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Interface address message header (struct ifaddrmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfAddrMsg {
    pub ifa_family: u8,
    pub ifa_prefixlen: u8,
    pub ifa_flags: u8,
    pub ifa_scope: u8,
    pub ifa_index: u32,
}

impl IfAddrMsg {
    pub const SIZE: usize = 8;

    /// Header for a dump filtered to one family.
    pub fn for_family(family: u8) -> Self {
        Self {
            ifa_family: family,
            ..Default::default()
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

mod attr_ids {
    pub const IFA_ADDRESS: u16 = 1;
    pub const IFA_LOCAL: u16 = 2;
    pub const IFA_FLAGS: u16 = 8;
}

/// IFA_F_* flag bits.
pub mod flags {
    pub const IFA_F_SECONDARY: u32 = 0x01;
    pub const IFA_F_NODAD: u32 = 0x02;
    pub const IFA_F_DADFAILED: u32 = 0x08;
    pub const IFA_F_TENTATIVE: u32 = 0x40;
    pub const IFA_F_PERMANENT: u32 = 0x80;
}

/// A parsed address message.
#[derive(Debug, Clone, Default)]
pub struct AddressMessage {
    pub header: IfAddrMsg,
    /// IFA_ADDRESS.
    pub address: Option<IpAddr>,
    /// IFA_LOCAL.
    pub local: Option<IpAddr>,
    /// IFA_FLAGS (supersedes the 8-bit header flags when present).
    pub flags: Option<u32>,
}

impl AddressMessage {
    /// Parse a message payload (everything after the nlmsghdr).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        parse_address
            .parse(data)
            .map_err(|_| Error::InvalidMessage("malformed ifaddrmsg".into()))
    }

    pub fn ifindex(&self) -> u32 {
        self.header.ifa_index
    }

    pub fn prefix_len(&self) -> u8 {
        self.header.ifa_prefixlen
    }

    /// Effective flags.
    pub fn all_flags(&self) -> u32 {
        self.flags.unwrap_or(self.header.ifa_flags as u32)
    }

    /// The address assigned to the interface (local, falling back to address).
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.local.or(self.address)
    }

    pub fn is_tentative(&self) -> bool {
        self.all_flags() & flags::IFA_F_TENTATIVE != 0
    }

    pub fn is_dad_failed(&self) -> bool {
        self.all_flags() & flags::IFA_F_DADFAILED != 0
    }

    /// Check for an IPv6 link-local (fe80::/10) address.
    pub fn is_ipv6_link_local(&self) -> bool {
        matches!(
            self.primary_address(),
            Some(IpAddr::V6(addr)) if addr.segments()[0] & 0xffc0 == 0xfe80
        )
    }
}

fn parse_address(input: &mut &[u8]) -> PResult<AddressMessage> {
    let header_bytes: &[u8] = take(IfAddrMsg::SIZE).parse_next(input)?;
    let header = IfAddrMsg::read_from_bytes(header_bytes)
        .map_err(|_| ErrMode::Cut(ContextError::new()))?;

    let mut msg = AddressMessage {
        header,
        ..Default::default()
    };

    while input.len() >= 4 {
        let len = le_u16.parse_next(input)? as usize;
        let attr_type = le_u16.parse_next(input)?;
        if len < 4 {
            return Err(ErrMode::Cut(ContextError::new()));
        }
        let data: &[u8] = take(len - 4).parse_next(input)?;

        let padding = (nla_align(len) - len).min(input.len());
        let _: &[u8] = take(padding).parse_next(input)?;

        match attr_type & 0x3fff {
            attr_ids::IFA_ADDRESS => msg.address = ip_addr(data, header.ifa_family),
            attr_ids::IFA_LOCAL => msg.local = ip_addr(data, header.ifa_family),
            attr_ids::IFA_FLAGS => msg.flags = get::u32_ne(data).ok(),
            _ => {}
        }
    }

    Ok(msg)
}

fn ip_addr(data: &[u8], family: u8) -> Option<IpAddr> {
    match family as i32 {
        libc::AF_INET => get::array::<4>(data, "ipv4")
            .ok()
            .map(|b| IpAddr::V4(Ipv4Addr::from(b))),
        libc::AF_INET6 => get::array::<16>(data, "ipv6")
            .ok()
            .map(|b| IpAddr::V6(Ipv6Addr::from(b))),
        _ => None,
    }
}
