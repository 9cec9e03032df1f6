//! Bridge master (`IFLA_INFO_KIND = "bridge"`) settings.

use serde::{Deserialize, Serialize};

use super::{KindData, Result};
use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::AttrBuilder;

/// Bridge-specific attributes (IFLA_BR_*)
mod attrs {
    pub const IFLA_BR_STP_STATE: u16 = 5;
    pub const IFLA_BR_VLAN_FILTERING: u16 = 7;
}

use attrs::*;

/// Bridge master settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeMasterSpec {
    pub stp_enabled: bool,
    pub vlan_filtering_enabled: bool,
}

impl KindData for BridgeMasterSpec {
    const KIND: &'static str = "bridge";

    fn encode(&self) -> Result<Vec<u8>> {
        let mut b = AttrBuilder::new();
        b.append_attr_u32(IFLA_BR_STP_STATE, u32::from(self.stp_enabled));
        b.append_attr_u8(IFLA_BR_VLAN_FILTERING, u8::from(self.vlan_filtering_enabled));
        Ok(b.finish())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut bridge = Self::default();
        for attr in AttrIter::strict(data) {
            let (kind, payload) = attr?;
            match kind {
                IFLA_BR_STP_STATE => bridge.stp_enabled = get::u32_ne(payload)? == 1,
                IFLA_BR_VLAN_FILTERING => bridge.vlan_filtering_enabled = get::u8(payload)? == 1,
                _ => {}
            }
        }
        Ok(bridge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for (stp, vlan) in [(false, false), (true, false), (false, true), (true, true)] {
            let spec = BridgeMasterSpec {
                stp_enabled: stp,
                vlan_filtering_enabled: vlan,
            };
            assert_eq!(BridgeMasterSpec::decode(&spec.encode().unwrap()).unwrap(), spec);
        }
    }

    #[test]
    fn test_widths() {
        let spec = BridgeMasterSpec {
            stp_enabled: true,
            vlan_filtering_enabled: true,
        };
        let data = spec.encode().unwrap();
        let attrs: Vec<_> = AttrIter::new(&data).collect();
        assert_eq!(attrs[0].1.len(), 4);
        assert_eq!(attrs[1], (IFLA_BR_VLAN_FILTERING, &[1u8][..]));
    }

    #[test]
    fn test_decode_skips_other_bridge_attrs() {
        let mut b = AttrBuilder::new();
        b.append_attr_u32(1, 1500); // forward delay
        b.append_attr_u32(IFLA_BR_STP_STATE, 1);
        let decoded = BridgeMasterSpec::decode(&b.finish()).unwrap();
        assert!(decoded.stp_enabled);
        assert!(!decoded.vlan_filtering_enabled);
    }
}
