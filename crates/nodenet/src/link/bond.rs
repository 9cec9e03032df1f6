//! Bond master (`IFLA_INFO_KIND = "bond"`) settings.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{Error, KindData, Result, kernel_enum};
use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::AttrBuilder;

/// Bond-specific attributes (IFLA_BOND_*)
mod attrs {
    pub const IFLA_BOND_MODE: u16 = 1;
    pub const IFLA_BOND_ACTIVE_SLAVE: u16 = 2;
    pub const IFLA_BOND_MIIMON: u16 = 3;
    pub const IFLA_BOND_UPDELAY: u16 = 4;
    pub const IFLA_BOND_DOWNDELAY: u16 = 5;
    pub const IFLA_BOND_USE_CARRIER: u16 = 6;
    pub const IFLA_BOND_ARP_INTERVAL: u16 = 7;
    pub const IFLA_BOND_ARP_IP_TARGET: u16 = 8;
    pub const IFLA_BOND_ARP_VALIDATE: u16 = 9;
    pub const IFLA_BOND_ARP_ALL_TARGETS: u16 = 10;
    pub const IFLA_BOND_PRIMARY: u16 = 11;
    pub const IFLA_BOND_PRIMARY_RESELECT: u16 = 12;
    pub const IFLA_BOND_FAIL_OVER_MAC: u16 = 13;
    pub const IFLA_BOND_XMIT_HASH_POLICY: u16 = 14;
    pub const IFLA_BOND_RESEND_IGMP: u16 = 15;
    pub const IFLA_BOND_NUM_PEER_NOTIF: u16 = 16;
    pub const IFLA_BOND_ALL_SLAVES_ACTIVE: u16 = 17;
    pub const IFLA_BOND_MIN_LINKS: u16 = 18;
    pub const IFLA_BOND_LP_INTERVAL: u16 = 19;
    pub const IFLA_BOND_PACKETS_PER_SLAVE: u16 = 20;
    pub const IFLA_BOND_AD_LACP_RATE: u16 = 21;
    pub const IFLA_BOND_AD_SELECT: u16 = 22;
    pub const IFLA_BOND_AD_ACTOR_SYS_PRIO: u16 = 24;
    pub const IFLA_BOND_AD_USER_PORT_KEY: u16 = 25;
    pub const IFLA_BOND_TLB_DYNAMIC_LB: u16 = 27;
    pub const IFLA_BOND_PEER_NOTIF_DELAY: u16 = 28;
    pub const IFLA_BOND_AD_LACP_ACTIVE: u16 = 29;
    pub const IFLA_BOND_MISSED_MAX: u16 = 30;
    pub const IFLA_BOND_NS_IP6_TARGET: u16 = 31;
}

use attrs::*;

kernel_enum! {
    /// Bonding mode.
    pub enum BondMode: u8 {
        RoundRobin = 0 => "balance-rr",
        ActiveBackup = 1 => "active-backup",
        Xor = 2 => "balance-xor",
        Broadcast = 3 => "broadcast",
        Lacp = 4 => "802.3ad",
        Tlb = 5 => "balance-tlb",
        Alb = 6 => "balance-alb",
    }
}

impl BondMode {
    /// ALB and TLB balance by tracking peers rather than by ARP/LACP.
    pub fn is_load_balancing(self) -> bool {
        matches!(self, Self::Alb | Self::Tlb)
    }

    /// Modes where the ARP monitor (and NS targets) can be used.
    pub fn supports_arp_monitor(self) -> bool {
        !matches!(self, Self::Lacp | Self::Alb | Self::Tlb)
    }

    /// Modes where a primary slave can be chosen.
    pub fn supports_primary(self) -> bool {
        matches!(self, Self::ActiveBackup | Self::Alb | Self::Tlb)
    }
}

kernel_enum! {
    /// Transmit hash policy.
    pub enum XmitHashPolicy: u8 {
        Layer2 = 0 => "layer2",
        Layer34 = 1 => "layer3+4",
        Layer23 = 2 => "layer2+3",
        Encap23 = 3 => "encap2+3",
        Encap34 = 4 => "encap3+4",
        VlanSrcMac = 5 => "vlan+srcmac",
    }
}

kernel_enum! {
    /// LACPDU transmit rate.
    pub enum LacpRate: u8 {
        Slow = 0 => "slow",
        Fast = 1 => "fast",
    }
}

kernel_enum! {
    /// ARP probe validation.
    pub enum ArpValidate: u32 {
        None = 0 => "none",
        Active = 1 => "active",
        Backup = 2 => "backup",
        All = 3 => "all",
        Filter = 4 => "filter",
        FilterActive = 5 => "filter_active",
        FilterBackup = 6 => "filter_backup",
    }
}

kernel_enum! {
    /// How many ARP targets must be reachable.
    pub enum ArpAllTargets: u32 {
        Any = 0 => "any",
        All = 1 => "all",
    }
}

kernel_enum! {
    /// Primary slave reselection policy.
    pub enum PrimaryReselect: u8 {
        Always = 0 => "always",
        Better = 1 => "better",
        Failure = 2 => "failure",
    }
}

kernel_enum! {
    /// MAC address handling on failover.
    pub enum FailOverMac: u8 {
        None = 0 => "none",
        Active = 1 => "active",
        Follow = 2 => "follow",
    }
}

kernel_enum! {
    /// 802.3ad aggregator selection.
    pub enum AdSelect: u8 {
        Stable = 0 => "stable",
        Bandwidth = 1 => "bandwidth",
        Count = 2 => "count",
    }
}

kernel_enum! {
    /// Whether LACPDUs are sent actively.
    pub enum AdLacpActive: u8 {
        Off = 0 => "off",
        On = 1 => "on",
    }
}

/// Bond master tunables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BondMasterSpec {
    pub mode: BondMode,
    #[serde(rename = "xmitHashPolicy")]
    pub hash_policy: XmitHashPolicy,
    pub lacp_rate: LacpRate,
    pub arp_validate: ArpValidate,
    pub arp_all_targets: ArpAllTargets,
    /// Interface index of the primary slave.
    #[serde(rename = "primary", skip_serializing_if = "Option::is_none")]
    pub primary_index: Option<u32>,
    pub primary_reselect: PrimaryReselect,
    pub fail_over_mac: FailOverMac,
    pub ad_select: AdSelect,
    #[serde(rename = "miimon")]
    pub mii_mon: u32,
    #[serde(rename = "updelay")]
    pub up_delay: u32,
    #[serde(rename = "downdelay")]
    pub down_delay: u32,
    pub arp_interval: u32,
    /// IPv4 ARP monitor targets.
    pub arp_ip_targets: Vec<IpAddr>,
    /// IPv6 NS monitor targets.
    pub ns_ip6_targets: Vec<IpAddr>,
    pub resend_igmp: u32,
    pub min_links: u32,
    pub lp_interval: u32,
    pub packets_per_slave: u32,
    pub num_peer_notif: u8,
    pub tlb_dynamic_lb: u8,
    pub all_slaves_active: u8,
    pub use_carrier: bool,
    pub ad_actor_sys_prio: u16,
    pub ad_user_port_key: u16,
    pub peer_notify_delay: u32,
    pub ad_lacp_active: AdLacpActive,
    pub missed_max: u8,
}

impl BondMasterSpec {
    /// Replace zero values with the kernel's effective defaults for `mode`.
    pub fn fill_defaults(&mut self) {
        if self.resend_igmp == 0 {
            self.resend_igmp = 1;
        }
        if self.lp_interval == 0 {
            self.lp_interval = 1;
        }
        if self.packets_per_slave == 0 {
            self.packets_per_slave = 1;
        }
        if self.num_peer_notif == 0 {
            self.num_peer_notif = 1;
        }
        if !self.mode.is_load_balancing() {
            self.tlb_dynamic_lb = 1;
        }
        if self.mode == BondMode::Lacp && self.ad_actor_sys_prio == 0 {
            self.ad_actor_sys_prio = 65535;
        }
        if self.missed_max == 0 {
            self.missed_max = 2;
        }
        if self.mode != BondMode::Lacp {
            self.ad_lacp_active = AdLacpActive::On;
        }
    }

    /// Check whether every field holds its zero value.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl KindData for BondMasterSpec {
    const KIND: &'static str = "bond";

    fn encode(&self) -> Result<Vec<u8>> {
        let mode = self.mode;
        let mut b = AttrBuilder::new();

        b.append_attr_u8(IFLA_BOND_MODE, mode.into());
        b.append_attr_u8(IFLA_BOND_XMIT_HASH_POLICY, self.hash_policy.into());

        if mode == BondMode::Lacp {
            b.append_attr_u8(IFLA_BOND_AD_LACP_RATE, self.lacp_rate.into());
            b.append_attr_u8(IFLA_BOND_AD_LACP_ACTIVE, self.ad_lacp_active.into());
        }

        if mode.supports_arp_monitor() {
            b.append_attr_u32(IFLA_BOND_ARP_VALIDATE, self.arp_validate.into());
        }

        b.append_attr_u32(IFLA_BOND_ARP_ALL_TARGETS, self.arp_all_targets.into());

        if let Some(primary) = self.primary_index
            && mode.supports_primary()
        {
            b.append_attr_u32(IFLA_BOND_PRIMARY, primary);
        }

        b.append_attr_u8(IFLA_BOND_PRIMARY_RESELECT, self.primary_reselect.into());
        b.append_attr_u8(IFLA_BOND_FAIL_OVER_MAC, self.fail_over_mac.into());
        b.append_attr_u8(IFLA_BOND_AD_SELECT, self.ad_select.into());
        b.append_attr_u32(IFLA_BOND_MIIMON, self.mii_mon);

        if self.mii_mon != 0 {
            b.append_attr_u32(IFLA_BOND_UPDELAY, self.up_delay);
            b.append_attr_u32(IFLA_BOND_DOWNDELAY, self.down_delay);
        }

        if mode.supports_arp_monitor() {
            b.append_attr_u32(IFLA_BOND_ARP_INTERVAL, self.arp_interval);
            append_targets(&mut b, IFLA_BOND_ARP_IP_TARGET, &self.arp_ip_targets, false)?;
            append_targets(&mut b, IFLA_BOND_NS_IP6_TARGET, &self.ns_ip6_targets, true)?;
        }

        b.append_attr_u32(IFLA_BOND_RESEND_IGMP, self.resend_igmp);
        b.append_attr_u32(IFLA_BOND_MIN_LINKS, self.min_links);
        b.append_attr_u32(IFLA_BOND_LP_INTERVAL, self.lp_interval);

        if mode == BondMode::RoundRobin {
            b.append_attr_u32(IFLA_BOND_PACKETS_PER_SLAVE, self.packets_per_slave);
        }

        b.append_attr_u8(IFLA_BOND_NUM_PEER_NOTIF, self.num_peer_notif);

        if mode.is_load_balancing() {
            b.append_attr_u8(IFLA_BOND_TLB_DYNAMIC_LB, self.tlb_dynamic_lb);
        }

        b.append_attr_u8(IFLA_BOND_ALL_SLAVES_ACTIVE, self.all_slaves_active);
        b.append_attr_u8(IFLA_BOND_USE_CARRIER, u8::from(self.use_carrier));

        if mode == BondMode::Lacp {
            b.append_attr_u16(IFLA_BOND_AD_ACTOR_SYS_PRIO, self.ad_actor_sys_prio);
            b.append_attr_u16(IFLA_BOND_AD_USER_PORT_KEY, self.ad_user_port_key);
        }

        if self.mii_mon != 0 {
            b.append_attr_u32(IFLA_BOND_PEER_NOTIF_DELAY, self.peer_notify_delay);
        }

        if self.missed_max != 0 {
            b.append_attr_u8(IFLA_BOND_MISSED_MAX, self.missed_max);
        }

        Ok(b.finish())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut bond = Self::default();

        for attr in AttrIter::strict(data) {
            let (kind, payload) = attr?;
            match kind {
                IFLA_BOND_MODE => bond.mode = get::u8(payload)?.into(),
                IFLA_BOND_XMIT_HASH_POLICY => bond.hash_policy = get::u8(payload)?.into(),
                IFLA_BOND_AD_LACP_RATE => bond.lacp_rate = get::u8(payload)?.into(),
                IFLA_BOND_AD_LACP_ACTIVE => bond.ad_lacp_active = get::u8(payload)?.into(),
                IFLA_BOND_ARP_VALIDATE => bond.arp_validate = get::u32_ne(payload)?.into(),
                IFLA_BOND_ARP_ALL_TARGETS => {
                    bond.arp_all_targets = get::u32_ne(payload)?.into();
                }
                IFLA_BOND_PRIMARY => bond.primary_index = Some(get::u32_ne(payload)?),
                IFLA_BOND_PRIMARY_RESELECT => bond.primary_reselect = get::u8(payload)?.into(),
                IFLA_BOND_FAIL_OVER_MAC => bond.fail_over_mac = get::u8(payload)?.into(),
                IFLA_BOND_AD_SELECT => bond.ad_select = get::u8(payload)?.into(),
                IFLA_BOND_MIIMON => bond.mii_mon = get::u32_ne(payload)?,
                IFLA_BOND_UPDELAY => bond.up_delay = get::u32_ne(payload)?,
                IFLA_BOND_DOWNDELAY => bond.down_delay = get::u32_ne(payload)?,
                IFLA_BOND_ARP_INTERVAL => bond.arp_interval = get::u32_ne(payload)?,
                IFLA_BOND_ARP_IP_TARGET => bond.arp_ip_targets = decode_targets(payload)?,
                IFLA_BOND_NS_IP6_TARGET => bond.ns_ip6_targets = decode_targets(payload)?,
                IFLA_BOND_RESEND_IGMP => bond.resend_igmp = get::u32_ne(payload)?,
                IFLA_BOND_MIN_LINKS => bond.min_links = get::u32_ne(payload)?,
                IFLA_BOND_LP_INTERVAL => bond.lp_interval = get::u32_ne(payload)?,
                IFLA_BOND_PACKETS_PER_SLAVE => bond.packets_per_slave = get::u32_ne(payload)?,
                IFLA_BOND_NUM_PEER_NOTIF => bond.num_peer_notif = get::u8(payload)?,
                IFLA_BOND_TLB_DYNAMIC_LB => bond.tlb_dynamic_lb = get::u8(payload)?,
                IFLA_BOND_ALL_SLAVES_ACTIVE => bond.all_slaves_active = get::u8(payload)?,
                IFLA_BOND_USE_CARRIER => bond.use_carrier = get::u8(payload)? == 1,
                IFLA_BOND_AD_ACTOR_SYS_PRIO => bond.ad_actor_sys_prio = get::u16_ne(payload)?,
                IFLA_BOND_AD_USER_PORT_KEY => bond.ad_user_port_key = get::u16_ne(payload)?,
                IFLA_BOND_PEER_NOTIF_DELAY => bond.peer_notify_delay = get::u32_ne(payload)?,
                IFLA_BOND_MISSED_MAX => bond.missed_max = get::u8(payload)?,
                // read-only runtime state
                IFLA_BOND_ACTIVE_SLAVE => {}
                _ => {}
            }
        }

        Ok(bond)
    }
}

/// Emit a nested address list, children typed by position.
///
/// Nothing is emitted for an empty list.
fn append_targets(b: &mut AttrBuilder, attr: u16, targets: &[IpAddr], v6: bool) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }

    let name = if v6 {
        "IFLA_BOND_NS_IP6_TARGET"
    } else {
        "IFLA_BOND_ARP_IP_TARGET"
    };

    let nest = b.nest_start(attr);
    for (i, addr) in targets.iter().enumerate() {
        match (addr, v6) {
            (IpAddr::V4(v4), false) => b.append_attr(i as u16, &v4.octets()),
            (IpAddr::V6(v6), true) => b.append_attr(i as u16, &v6.octets()),
            _ => {
                return Err(Error::WrongFamily {
                    attr: name,
                    addr: *addr,
                    expected: if v6 { "IPv6" } else { "IPv4" },
                });
            }
        }
    }
    b.nest_end(nest);

    Ok(())
}

fn decode_targets(data: &[u8]) -> Result<Vec<IpAddr>> {
    let mut targets = Vec::new();
    for attr in AttrIter::strict(data) {
        let (_, payload) = attr?;
        let addr = match payload.len() {
            4 => IpAddr::from(get::array::<4>(payload, "ipv4")?),
            16 => IpAddr::from(get::array::<16>(payload, "ipv6")?),
            n => {
                return Err(crate::netlink::Error::InvalidAttribute(format!(
                    "bond target of {} bytes",
                    n
                ))
                .into());
            }
        };
        targets.push(addr);
    }
    Ok(targets)
}
