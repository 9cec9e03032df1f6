//! Declarative firewall rule model.
//!
//! Every match is optional; a rule with no matches and no actions compiles
//! to nothing.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::expr::VerdictKind;

/// A declarative firewall rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iif_name: Option<IfNameMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oif_name: Option<IfNameMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark: Option<Mark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<AddressMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<AddressMatch>,
    #[serde(rename = "layer4", skip_serializing_if = "Option::is_none")]
    pub l4: Option<L4Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conntrack_state: Option<ConntrackStateMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<LimitMatch>,
    pub anon_counter: bool,
    #[serde(rename = "clampMSS", skip_serializing_if = "Option::is_none")]
    pub clamp_mss: Option<ClampMss>,
    /// Rewrite the packet mark with `mask` and `xor`; `value` is unused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_mark: Option<Mark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<VerdictKind>,
}

/// Equality operator for interface name matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOperator {
    #[default]
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

/// Match the input or output interface name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IfNameMatch {
    pub interface_names: Vec<String>,
    pub operator: MatchOperator,
}

impl IfNameMatch {
    pub fn new<S: Into<String>>(operator: MatchOperator, names: impl IntoIterator<Item = S>) -> Self {
        Self {
            interface_names: names.into_iter().map(Into::into).collect(),
            operator,
        }
    }
}

/// Packet mark; as a match, `(mark & mask) ^ xor == value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mark {
    pub value: u32,
    pub mask: u32,
    pub xor: u32,
}

/// Match an address against `(include) minus (exclude)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddressMatch {
    pub include_subnets: Vec<IpNet>,
    pub exclude_subnets: Vec<IpNet>,
    pub invert: bool,
}

/// Transport protocol number.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp = 1,
    #[default]
    Tcp = 6,
    Udp = 17,
    Icmpv6 = 58,
}

impl Protocol {
    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub lo: u16,
    pub hi: u16,
}

impl PortRange {
    pub fn new(lo: u16, hi: u16) -> Self {
        Self { lo, hi }
    }

    pub fn single(port: u16) -> Self {
        Self { lo: port, hi: port }
    }
}

/// Match the L4 protocol and optionally its ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct L4Match {
    pub protocol: Protocol,
    /// Empty means any source port.
    pub source_ports: Vec<PortRange>,
    /// Empty means any destination port.
    pub destination_ports: Vec<PortRange>,
}

/// Conntrack state, as the kernel's state bit.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConntrackState {
    Invalid = 1,
    Established = 2,
    Related = 4,
    New = 8,
}

impl ConntrackState {
    pub fn bit(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConntrackStateMatch {
    pub states: Vec<ConntrackState>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitMatch {
    pub packet_rate_per_second: u64,
}

/// Clamp the MSS of TCP SYN packets to fit `mtu`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClampMss {
    pub mtu: u16,
}
