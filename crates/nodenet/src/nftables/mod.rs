//! Declarative firewall rule compiler.
//!
//! A [`Rule`] is lowered into one instruction list per kernel rule plus the
//! anonymous sets its lookups reference. Matches that depend on the address
//! family split the rule in two, one guarded by `meta nfproto ipv4` and one
//! by `meta nfproto ipv6`.
//!
//! `Lookup` instructions carry the position of their set in
//! [`Compiled::sets`]; whoever installs the rule rewrites it to the
//! kernel-assigned set id.
//!
//! # Example
//!
//! ```ignore
//! use nodenet::nftables::{AddressMatch, Rule, VerdictKind};
//!
//! let rule = Rule {
//!     source_address: Some(AddressMatch {
//!         include_subnets: vec!["192.168.0.0/16".parse()?],
//!         exclude_subnets: vec!["192.168.4.0/24".parse()?],
//!         invert: false,
//!     }),
//!     verdict: Some(VerdictKind::Drop),
//!     ..Default::default()
//! };
//! let compiled = rule.compile()?;
//! assert_eq!(compiled.rules.len(), 1);
//! assert_eq!(compiled.sets[0].elements().len(), 4);
//! ```

mod compile;
pub mod expr;
mod rule;
mod set;

pub use compile::{Compiled, compile};
pub use expr::{Instruction, VerdictKind};
pub use rule::{
    AddressMatch, ClampMss, ConntrackState, ConntrackStateMatch, IfNameMatch, L4Match,
    LimitMatch, Mark, MatchOperator, PortRange, Protocol, Rule,
};
pub use set::{NfTablesSet, SetElement, SetKeyType};

/// Result type for rule compilation.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid interface name {0:?}")]
    InvalidInterfaceName(String),

    #[error("invalid port range {lo}-{hi}")]
    InvalidPortRange { lo: u16, hi: u16 },

    #[error("MTU {0} too small to clamp MSS")]
    MtuTooSmall(u16),
}
