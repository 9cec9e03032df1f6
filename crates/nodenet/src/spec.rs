//! Network specs produced by operators and consumed by the reconciler.
//!
//! Every spec carries a [`ConfigLayer`] so the reconciler can decide
//! precedence between operator, platform and user intent. Specs are plain
//! values; producers hand out clones.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::link::kernel_enum;

/// Result type for spec helpers.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid hostname {0:?}: {1}")]
    InvalidHostname(String, &'static str),
}

/// Origin of a spec, lowest precedence first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLayer {
    #[default]
    Default,
    Cmdline,
    Platform,
    Operator,
    Configuration,
}

kernel_enum! {
    /// Address family (`AF_*`).
    pub enum Family: u8 {
        Unspec = 0 => "unspec",
        Inet4 = 2 => "inet4",
        Inet6 = 10 => "inet6",
    }
}

impl Family {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Inet4,
            IpAddr::V6(_) => Self::Inet6,
        }
    }
}

kernel_enum! {
    /// Route and address scope (`RT_SCOPE_*`).
    pub enum Scope: u8 {
        Global = 0 => "global",
        Site = 200 => "site",
        Link = 253 => "link",
        Host = 254 => "host",
        Nowhere = 255 => "nowhere",
    }
}

kernel_enum! {
    /// Route type (`RTN_*`).
    pub enum RouteType: u8 {
        Unspec = 0 => "unspec",
        Unicast = 1 => "unicast",
        Local = 2 => "local",
        Broadcast = 3 => "broadcast",
        Anycast = 4 => "anycast",
        Multicast = 5 => "multicast",
        Blackhole = 6 => "blackhole",
        Unreachable = 7 => "unreachable",
        Prohibit = 8 => "prohibit",
    }
}

kernel_enum! {
    /// Route origin (`RTPROT_*`).
    pub enum RouteProtocol: u8 {
        Unspec = 0 => "unspec",
        Redirect = 1 => "redirect",
        Kernel = 2 => "kernel",
        Boot = 3 => "boot",
        Static = 4 => "static",
        Ra = 9 => "ra",
        Dhcp = 16 => "dhcp",
    }
}

kernel_enum! {
    /// Routing table (`RT_TABLE_*`); other ids stay numeric.
    pub enum RoutingTable: u32 {
        Unspec = 0 => "unspec",
        Fallback = 253 => "default",
        Main = 254 => "main",
        Local = 255 => "local",
    }
}

/// `IFA_F_*` address flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressFlags(pub u32);

impl AddressFlags {
    pub const SECONDARY: Self = Self(0x01);
    pub const NODAD: Self = Self(0x02);
    pub const DADFAILED: Self = Self(0x08);
    pub const TENTATIVE: Self = Self(0x40);
    pub const PERMANENT: Self = Self(0x80);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AddressFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Desired address on a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpec {
    pub address: IpNet,
    pub link_name: String,
    pub family: Family,
    pub scope: Scope,
    pub flags: AddressFlags,
    /// Send gratuitous ARP after assignment.
    #[serde(default)]
    pub announce_with_arp: bool,
    pub config_layer: ConfigLayer,
}

/// Desired link settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkSpec {
    pub name: String,
    pub up: bool,
    pub mtu: u32,
    pub config_layer: ConfigLayer,
}

/// Desired route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteSpec {
    pub family: Family,
    pub destination: Option<IpNet>,
    pub source: Option<IpAddr>,
    pub gateway: Option<IpAddr>,
    pub out_link_name: String,
    pub table: RoutingTable,
    pub priority: u32,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub protocol: RouteProtocol,
    pub mtu: u32,
    pub config_layer: ConfigLayer,
}

impl RouteSpec {
    /// Canonicalize zero values and derive scope and family.
    ///
    /// `0.0.0.0/0` and `::/0` destinations become `None`, as do unspecified
    /// source and gateway addresses. A global route with a destination but
    /// no gateway is on-link, so its scope becomes [`Scope::Link`].
    pub fn normalize(&mut self) -> &mut Self {
        if let Some(dst) = self.destination
            && dst.prefix_len() == 0
            && dst.addr().is_unspecified()
        {
            self.destination = None;
        }

        if self.source.is_some_and(|src| src.is_unspecified()) {
            self.source = None;
        }

        if self.gateway.is_some_and(|gw| gw.is_unspecified()) {
            self.gateway = None;
        }

        if self.gateway.is_none() && self.destination.is_some() && self.scope == Scope::Global {
            self.scope = Scope::Link;
        }

        if self.family == Family::Unspec {
            if let Some(gw) = self.gateway {
                self.family = Family::of(gw);
            } else if let Some(dst) = self.destination {
                self.family = Family::of(dst.addr());
            }
        }

        self
    }
}

/// Desired DNS resolvers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverSpec {
    pub dns_servers: Vec<IpAddr>,
    pub config_layer: ConfigLayer,
}

/// Desired NTP servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeServerSpec {
    pub ntp_servers: Vec<String>,
    pub config_layer: ConfigLayer,
}

/// Desired node hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostnameSpec {
    pub hostname: String,
    pub domainname: String,
    pub config_layer: ConfigLayer,
}

const MAX_HOSTNAME_LEN: usize = 63;

impl HostnameSpec {
    /// Split `fqdn` at the first dot into hostname and domain.
    pub fn parse_fqdn(&mut self, fqdn: &str) -> Result<()> {
        let fqdn = fqdn.strip_suffix('.').unwrap_or(fqdn);
        let (hostname, domainname) = fqdn.split_once('.').unwrap_or((fqdn, ""));

        if hostname.is_empty() {
            return Err(Error::InvalidHostname(fqdn.to_string(), "empty hostname"));
        }
        if hostname.len() > MAX_HOSTNAME_LEN {
            return Err(Error::InvalidHostname(
                fqdn.to_string(),
                "hostname longer than 63 characters",
            ));
        }

        self.hostname = hostname.to_string();
        self.domainname = domainname.to_string();
        Ok(())
    }

    pub fn fqdn(&self) -> String {
        if self.domainname.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}.{}", self.hostname, self.domainname)
        }
    }
}

/// Address as observed on a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStatus {
    pub address: IpNet,
    #[serde(default)]
    pub local: Option<IpAddr>,
    pub link_index: u32,
    pub link_name: String,
    pub family: Family,
    pub scope: Scope,
    pub flags: AddressFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_layer_order() {
        assert!(ConfigLayer::Default < ConfigLayer::Cmdline);
        assert!(ConfigLayer::Cmdline < ConfigLayer::Platform);
        assert!(ConfigLayer::Platform < ConfigLayer::Operator);
        assert!(ConfigLayer::Operator < ConfigLayer::Configuration);
    }

    #[test]
    fn test_normalize_default_route() {
        let mut route = RouteSpec {
            destination: Some("0.0.0.0/0".parse().unwrap()),
            gateway: Some("192.168.1.1".parse().unwrap()),
            source: Some("0.0.0.0".parse().unwrap()),
            ..Default::default()
        };
        route.normalize();
        assert_eq!(route.destination, None);
        assert_eq!(route.source, None);
        assert_eq!(route.scope, Scope::Global);
        assert_eq!(route.family, Family::Inet4);
    }

    #[test]
    fn test_normalize_on_link_route() {
        let mut route = RouteSpec {
            destination: Some("192.168.1.1/32".parse().unwrap()),
            gateway: Some("0.0.0.0".parse().unwrap()),
            ..Default::default()
        };
        route.normalize();
        assert_eq!(route.gateway, None);
        assert_eq!(route.scope, Scope::Link);
        assert_eq!(route.family, Family::Inet4);
    }

    #[test]
    fn test_normalize_keeps_explicit_scope() {
        let mut route = RouteSpec {
            destination: Some("fd00::/64".parse().unwrap()),
            scope: Scope::Host,
            ..Default::default()
        };
        route.normalize();
        assert_eq!(route.scope, Scope::Host);
        assert_eq!(route.family, Family::Inet6);
    }

    #[test]
    fn test_parse_fqdn() {
        let mut spec = HostnameSpec::default();
        spec.parse_fqdn("node-1.example.org").unwrap();
        assert_eq!(spec.hostname, "node-1");
        assert_eq!(spec.domainname, "example.org");
        assert_eq!(spec.fqdn(), "node-1.example.org");

        spec.parse_fqdn("solo.").unwrap();
        assert_eq!(spec.hostname, "solo");
        assert_eq!(spec.domainname, "");
        assert_eq!(spec.fqdn(), "solo");
    }

    #[test]
    fn test_parse_fqdn_rejects() {
        let mut spec = HostnameSpec::default();
        assert!(spec.parse_fqdn("").is_err());
        assert!(spec.parse_fqdn(".example.org").is_err());
        assert!(spec.parse_fqdn(&"a".repeat(64)).is_err());
        assert!(spec.parse_fqdn(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_enum_names() {
        assert_eq!(Scope::Link.to_string(), "link");
        assert_eq!("main".parse::<RoutingTable>().unwrap(), RoutingTable::Main);
        assert_eq!(RoutingTable::from(1001), RoutingTable::Other(1001));
        assert_eq!(u8::from(RouteProtocol::Boot), 3);
    }

    #[test]
    fn test_address_spec_json() {
        let spec = AddressSpec {
            address: "10.0.0.5/24".parse().unwrap(),
            link_name: "eth0".into(),
            family: Family::Inet4,
            scope: Scope::Global,
            flags: AddressFlags::PERMANENT,
            announce_with_arp: false,
            config_layer: ConfigLayer::Operator,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["family"], "inet4");
        assert_eq!(json["flags"], 0x80);
        assert_eq!(json["configLayer"], "operator");
    }
}
