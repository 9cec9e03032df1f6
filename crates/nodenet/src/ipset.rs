//! Include/exclude prefix arithmetic.
//!
//! An [`IpSet`] is `(union of includes) minus (union of excludes)`, kept as a
//! sorted list of disjoint, non-adjacent inclusive ranges with every IPv4
//! range before every IPv6 range.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use serde::Serialize;

/// Result type for IP set operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid prefix {0:?}")]
    InvalidPrefix(String),
}

/// Parse a CIDR prefix. A bare address is taken as a host prefix.
pub fn parse_prefix(s: &str) -> Result<IpNet> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net);
    }
    s.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| Error::InvalidPrefix(s.to_string()))
}

/// Inclusive address range within one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IpRange {
    pub from: IpAddr,
    pub to: IpAddr,
}

impl IpRange {
    pub fn is_ipv4(&self) -> bool {
        self.from.is_ipv4()
    }

    /// The address after `to`, or `None` at the end of the family.
    pub fn end_exclusive(&self) -> Option<IpAddr> {
        match self.to {
            IpAddr::V4(to) => u32::from(to).checked_add(1).map(|n| IpAddr::V4(n.into())),
            IpAddr::V6(to) => u128::from(to).checked_add(1).map(|n| IpAddr::V6(n.into())),
        }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.from, self.to, addr) {
            (IpAddr::V4(from), IpAddr::V4(to), IpAddr::V4(a)) => from <= a && a <= to,
            (IpAddr::V6(from), IpAddr::V6(to), IpAddr::V6(a)) => from <= a && a <= to,
            _ => false,
        }
    }

    /// Check whether the range spans its whole address family.
    pub fn is_full_family(&self) -> bool {
        match (self.from, self.to) {
            (IpAddr::V4(from), IpAddr::V4(to)) => {
                from == Ipv4Addr::UNSPECIFIED && to == Ipv4Addr::BROADCAST
            }
            (IpAddr::V6(from), IpAddr::V6(to)) => {
                from == Ipv6Addr::UNSPECIFIED && u128::from(to) == u128::MAX
            }
            _ => false,
        }
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Sorted, disjoint, non-adjacent inclusive intervals over one family.
#[derive(Debug, Clone, Default)]
struct Intervals(Vec<(u128, u128)>);

impl Intervals {
    fn add(&mut self, lo: u128, hi: u128) {
        self.0.push((lo, hi));
        self.0.sort_unstable();

        let mut merged: Vec<(u128, u128)> = Vec::with_capacity(self.0.len());
        for &(lo, hi) in &self.0 {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        self.0 = merged;
    }

    fn remove(&mut self, lo: u128, hi: u128) {
        let mut kept = Vec::with_capacity(self.0.len() + 1);
        for &(a, b) in &self.0 {
            if b < lo || a > hi {
                kept.push((a, b));
                continue;
            }
            if a < lo {
                kept.push((a, lo - 1));
            }
            if b > hi {
                kept.push((hi + 1, b));
            }
        }
        self.0 = kept;
    }
}

/// Accumulates includes and excludes; excludes always win.
#[derive(Debug, Clone, Default)]
pub struct IpSetBuilder {
    include: Vec<IpNet>,
    exclude: Vec<IpNet>,
}

impl IpSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_prefix(&mut self, prefix: IpNet) -> &mut Self {
        self.include.push(prefix);
        self
    }

    pub fn remove_prefix(&mut self, prefix: IpNet) -> &mut Self {
        self.exclude.push(prefix);
        self
    }

    pub fn build(&self) -> IpSet {
        let mut v4 = Intervals::default();
        let mut v6 = Intervals::default();

        for prefix in &self.include {
            let (lo, hi) = bounds(prefix);
            match prefix {
                IpNet::V4(_) => v4.add(lo, hi),
                IpNet::V6(_) => v6.add(lo, hi),
            }
        }
        for prefix in &self.exclude {
            let (lo, hi) = bounds(prefix);
            match prefix {
                IpNet::V4(_) => v4.remove(lo, hi),
                IpNet::V6(_) => v6.remove(lo, hi),
            }
        }

        let mut ranges = Vec::with_capacity(v4.0.len() + v6.0.len());
        ranges.extend(v4.0.iter().map(|&(lo, hi)| IpRange {
            from: IpAddr::V4(Ipv4Addr::from(lo as u32)),
            to: IpAddr::V4(Ipv4Addr::from(hi as u32)),
        }));
        ranges.extend(v6.0.iter().map(|&(lo, hi)| IpRange {
            from: IpAddr::V6(Ipv6Addr::from(lo)),
            to: IpAddr::V6(Ipv6Addr::from(hi)),
        }));

        IpSet { ranges }
    }
}

fn bounds(prefix: &IpNet) -> (u128, u128) {
    match prefix {
        IpNet::V4(net) => (
            u32::from(net.network()) as u128,
            u32::from(net.broadcast()) as u128,
        ),
        IpNet::V6(net) => (u128::from(net.network()), u128::from(net.broadcast())),
    }
}

/// Result of include/exclude arithmetic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSet {
    ranges: Vec<IpRange>,
}

impl IpSet {
    /// Build `(union of include) minus (union of exclude)`.
    pub fn build(include: &[IpNet], exclude: &[IpNet]) -> Self {
        let mut builder = IpSetBuilder::new();
        for prefix in include {
            builder.add_prefix(*prefix);
        }
        for prefix in exclude {
            builder.remove_prefix(*prefix);
        }
        builder.build()
    }

    /// Like [`IpSet::build`] from textual prefixes; fails on the first
    /// malformed one.
    pub fn parse<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        let include = include
            .iter()
            .map(|s| parse_prefix(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let exclude = exclude
            .iter()
            .map(|s| parse_prefix(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::build(&include, &exclude))
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }

    /// Partition into (IPv4 ranges, IPv6 ranges), preserving order.
    pub fn split(&self) -> (Vec<IpRange>, Vec<IpRange>) {
        self.ranges.iter().copied().partition(|r| r.is_ipv4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn range(from: &str, to: &str) -> IpRange {
        IpRange {
            from: from.parse().unwrap(),
            to: to.parse().unwrap(),
        }
    }

    #[test]
    fn test_difference_and_split() {
        let set = IpSet::build(
            &[net("10.0.0.0/8"), net("2001:db8::/32")],
            &[net("10.4.0.0/16")],
        );
        assert_eq!(
            set.ranges(),
            &[
                range("10.0.0.0", "10.3.255.255"),
                range("10.5.0.0", "10.255.255.255"),
                range("2001:db8::", "2001:db8:ffff:ffff:ffff:ffff:ffff:ffff"),
            ]
        );

        let (v4, v6) = set.split();
        assert_eq!(v4.len(), 2);
        assert_eq!(v6, vec![set.ranges()[2]]);
    }

    #[test]
    fn test_order_independent() {
        let a = IpSet::build(
            &[net("192.168.0.0/24"), net("fd00::/8"), net("192.168.1.0/24")],
            &[net("192.168.0.128/25"), net("fd00::/16")],
        );
        let b = IpSet::build(
            &[net("fd00::/8"), net("192.168.1.0/24"), net("192.168.0.0/24")],
            &[net("fd00::/16"), net("192.168.0.128/25")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_adjacent_prefixes_merge() {
        let set = IpSet::build(&[net("10.0.0.0/25"), net("10.0.0.128/25")], &[]);
        assert_eq!(set.ranges(), &[range("10.0.0.0", "10.0.0.255")]);
    }

    #[test]
    fn test_exclude_everything() {
        let set = IpSet::build(&[net("10.0.0.0/8")], &[net("0.0.0.0/0")]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_full_families() {
        let set = IpSet::build(&[net("0.0.0.0/0"), net("::/0")], &[]);
        let (v4, v6) = set.split();
        assert!(v4[0].is_full_family());
        assert!(v6[0].is_full_family());
        assert!(!range("10.0.0.0", "10.0.0.1").is_full_family());
    }

    #[test]
    fn test_exclude_at_family_edges() {
        let set = IpSet::build(&[net("0.0.0.0/0")], &[net("0.0.0.0/8"), net("255.0.0.0/8")]);
        assert_eq!(set.ranges(), &[range("1.0.0.0", "254.255.255.255")]);
    }

    #[test]
    fn test_host_bits_masked() {
        let set = IpSet::build(&[net("10.1.2.3/16")], &[]);
        assert_eq!(set.ranges(), &[range("10.1.0.0", "10.1.255.255")]);
    }

    #[test]
    fn test_parse() {
        let set = IpSet::parse(&["192.168.37.45", "fe80::/10"], &[]).unwrap();
        assert!(set.contains("192.168.37.45".parse().unwrap()));
        assert!(!set.contains("192.168.37.46".parse().unwrap()));
        assert!(set.contains("fe80::1".parse().unwrap()));

        assert!(matches!(
            IpSet::parse(&["10.0.0.0/33"], &[]),
            Err(Error::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_end_exclusive() {
        assert_eq!(
            range("10.0.0.0", "10.0.0.255").end_exclusive(),
            Some("10.0.1.0".parse().unwrap())
        );
        assert_eq!(range("255.0.0.0", "255.255.255.255").end_exclusive(), None);
        assert_eq!(
            range("fd00::", "fd00::ffff").end_exclusive(),
            Some("fd00::1:0".parse().unwrap())
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(range("10.0.0.0", "10.0.0.9").to_string(), "10.0.0.0-10.0.0.9");
    }
}
