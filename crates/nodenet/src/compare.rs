//! Total orders on prefixes and address statuses.

use std::cmp::Ordering;

use ipnet::IpNet;

use crate::spec::AddressStatus;

/// Address first, then prefix length ascending.
pub fn compare_prefixes_legacy(a: &IpNet, b: &IpNet) -> Ordering {
    a.addr()
        .cmp(&b.addr())
        .then_with(|| a.prefix_len().cmp(&b.prefix_len()))
}

/// Family first, more specific prefixes before the prefixes containing them.
///
/// IPv4 sorts before IPv6. For equal addresses the longer prefix comes
/// first. A prefix strictly inside another sorts before it. Anything else
/// falls back to address order.
pub fn compare_prefixes(a: &IpNet, b: &IpNet) -> Ordering {
    let family = a.addr().is_ipv6().cmp(&b.addr().is_ipv6());
    if family != Ordering::Equal {
        return family;
    }

    if a.addr() == b.addr() {
        return b.prefix_len().cmp(&a.prefix_len());
    }

    if a.prefix_len() < b.prefix_len() && a.contains(&b.addr()) {
        return Ordering::Greater;
    }
    if b.prefix_len() < a.prefix_len() && b.contains(&a.addr()) {
        return Ordering::Less;
    }

    a.addr().cmp(&b.addr())
}

/// Link name first, then address with `cmp`.
pub fn compare_address_statuses(
    a: &AddressStatus,
    b: &AddressStatus,
    cmp: fn(&IpNet, &IpNet) -> Ordering,
) -> Ordering {
    a.link_name
        .cmp(&b.link_name)
        .then_with(|| cmp(&a.address, &b.address))
}
