//! Network configuration core for Linux cluster nodes.
//!
//! This crate turns declarative network intent into the byte streams and
//! instruction lists the kernel consumes, and runs the long-lived operators
//! that produce that intent from leases and elections.
//!
//! # Modules
//!
//! - [`netlink`] - attribute framing, message builder and an async rtnetlink
//!   connection (used for address dumps)
//! - [`link`] - kind-specific `IFLA_INFO_DATA` codecs (bond, bridge, VLAN, VRF)
//! - [`ipset`] - include/exclude prefix arithmetic producing sorted ranges
//! - [`compare`] - total orders on prefixes and address statuses
//! - [`nftables`] - declarative rule to nftables instruction compiler
//! - [`wireguard`] - wireguard device specs and the peer differ
//! - [`spec`] - address/link/route/resolver/timeserver/hostname specs
//! - [`operator`] - the operator contract plus the DHCPv4, DHCPv6 and VIP
//!   operators
//! - [`dhcp`] - UDP wire transports for the DHCP operators
//!
//! # Example
//!
//! ```ignore
//! use nodenet::nftables::{compile, Rule, L4Match, Protocol, PortRange};
//!
//! let rule = Rule {
//!     l4: Some(L4Match {
//!         protocol: Protocol::Tcp,
//!         destination_ports: vec![PortRange::single(2000)],
//!         ..Default::default()
//!     }),
//!     ..Default::default()
//! };
//! let compiled = compile(&rule)?;
//! assert_eq!(compiled.rules.len(), 1);
//! ```

pub mod compare;
pub mod dhcp;
pub mod ipset;
pub mod link;
pub mod netlink;
pub mod nftables;
pub mod operator;
pub mod spec;
pub mod util;
pub mod wireguard;
