//! Anonymous lookup sets attached to compiled rules.

use std::net::IpAddr;

use serde::Serialize;

use super::rule::{ConntrackState, PortRange};
use crate::ipset::IpRange;

/// Kernel datatype of a set key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetKeyType {
    Ipv4Addr,
    Ipv6Addr,
    InetService,
    IfName,
    CtState,
}

impl SetKeyType {
    /// nftables datatype name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ipv4Addr => "ipv4_addr",
            Self::Ipv6Addr => "ipv6_addr",
            Self::InetService => "inet_service",
            Self::IfName => "ifname",
            Self::CtState => "ct_state",
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> u32 {
        match self {
            Self::Ipv4Addr | Self::CtState => 4,
            Self::Ipv6Addr | Self::IfName => 16,
            Self::InetService => 2,
        }
    }
}

/// One set element. Interval sets carry start/end pairs with the end
/// flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetElement {
    pub key: Vec<u8>,
    pub interval_end: bool,
}

impl SetElement {
    fn start(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            interval_end: false,
        }
    }

    fn end(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            interval_end: true,
        }
    }
}

/// A set referenced by index from `Lookup` instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum NfTablesSet {
    Ipv4(Vec<IpRange>),
    Ipv6(Vec<IpRange>),
    Port(Vec<PortRange>),
    /// Zero-padded interface names.
    IfName(Vec<[u8; 16]>),
    ConntrackState(Vec<ConntrackState>),
}

impl NfTablesSet {
    pub fn is_interval(&self) -> bool {
        matches!(self, Self::Ipv4(_) | Self::Ipv6(_) | Self::Port(_))
    }

    pub fn key_type(&self) -> SetKeyType {
        match self {
            Self::Ipv4(_) => SetKeyType::Ipv4Addr,
            Self::Ipv6(_) => SetKeyType::Ipv6Addr,
            Self::Port(_) => SetKeyType::InetService,
            Self::IfName(_) => SetKeyType::IfName,
            Self::ConntrackState(_) => SetKeyType::CtState,
        }
    }

    /// Materialize the elements to send to the kernel.
    ///
    /// An interval reaching the last address or port has no end element;
    /// the kernel treats it as open-ended.
    pub fn elements(&self) -> Vec<SetElement> {
        match self {
            Self::Ipv4(ranges) | Self::Ipv6(ranges) => {
                let mut elements = Vec::with_capacity(ranges.len() * 2);
                for range in ranges {
                    elements.push(SetElement::start(addr_bytes(range.from)));
                    if let Some(end) = range.end_exclusive() {
                        elements.push(SetElement::end(addr_bytes(end)));
                    }
                }
                elements
            }
            Self::Port(ports) => {
                let ports = merge_ports(ports);
                let mut elements = Vec::with_capacity(ports.len() * 2);
                for range in ports {
                    elements.push(SetElement::start(range.lo.to_be_bytes()));
                    if let Some(end) = range.hi.checked_add(1) {
                        elements.push(SetElement::end(end.to_be_bytes()));
                    }
                }
                elements
            }
            Self::IfName(names) => names.iter().map(|n| SetElement::start(*n)).collect(),
            Self::ConntrackState(states) => states
                .iter()
                .map(|s| SetElement::start(s.bit().to_ne_bytes()))
                .collect(),
        }
    }
}

fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Sort by lower bound and merge overlapping or adjacent ranges.
fn merge_ports(ports: &[PortRange]) -> Vec<PortRange> {
    let mut sorted = ports.to_vec();
    sorted.sort_by_key(|r| (r.lo, r.hi));

    let mut merged: Vec<PortRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if u32::from(range.lo) <= u32::from(last.hi) + 1 => {
                last.hi = last.hi.max(range.hi);
            }
            _ => merged.push(range),
        }
    }
    merged
}
