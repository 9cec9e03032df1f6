//! VLAN (`IFLA_INFO_KIND = "vlan"`) settings.

use serde::{Deserialize, Serialize};

use super::{KindData, Result, kernel_enum};
use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::AttrBuilder;

/// VLAN-specific attributes (IFLA_VLAN_*)
mod attrs {
    pub const IFLA_VLAN_ID: u16 = 1;
    pub const IFLA_VLAN_PROTOCOL: u16 = 5;
}

use attrs::*;

kernel_enum! {
    /// VLAN tag protocol (ethertype).
    pub enum VlanProtocol: u16 {
        Dot1q = 0x8100 => "802.1q",
        Dot1ad = 0x88a8 => "802.1ad",
    }
}

/// VLAN link settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VlanSpec {
    /// VLAN ID, 0..=4095.
    #[serde(rename = "vlanID")]
    pub vid: u16,
    #[serde(rename = "vlanProtocol")]
    pub protocol: VlanProtocol,
}

impl VlanSpec {
    pub fn new(vid: u16, protocol: VlanProtocol) -> Self {
        Self { vid, protocol }
    }
}

impl KindData for VlanSpec {
    const KIND: &'static str = "vlan";

    fn encode(&self) -> Result<Vec<u8>> {
        let mut b = AttrBuilder::new();
        b.append_attr_u16(IFLA_VLAN_ID, self.vid);
        b.append_attr_u16_be(IFLA_VLAN_PROTOCOL, self.protocol.into());
        Ok(b.finish())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut vlan = Self::default();
        for attr in AttrIter::strict(data) {
            let (kind, payload) = attr?;
            match kind {
                IFLA_VLAN_ID => vlan.vid = get::u16_ne(payload)?,
                IFLA_VLAN_PROTOCOL => vlan.protocol = get::u16_be(payload)?.into(),
                _ => {}
            }
        }
        Ok(vlan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_protocol_big_endian() {
        let data = VlanSpec::new(100, VlanProtocol::Dot1ad).encode().unwrap();
        let attrs: Vec<_> = AttrIter::new(&data).collect();
        assert_eq!(attrs[0], (IFLA_VLAN_ID, &100u16.to_ne_bytes()[..]));
        assert_eq!(attrs[1], (IFLA_VLAN_PROTOCOL, &[0x88, 0xa8][..]));
    }

    #[test]
    fn test_roundtrip() {
        let spec = VlanSpec::new(4094, VlanProtocol::Dot1q);
        let decoded = VlanSpec::decode(&spec.encode().unwrap()).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_default_protocol_is_unnamed() {
        // zero is not a valid ethertype, it stays raw
        assert_eq!(VlanProtocol::default(), VlanProtocol::Other(0));
    }
}
