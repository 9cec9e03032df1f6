//! VRF master (`IFLA_INFO_KIND = "vrf"`) settings.

use serde::{Deserialize, Serialize};

use super::{KindData, Result};
use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::AttrBuilder;

const IFLA_VRF_TABLE: u16 = 1;

/// VRF master settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VrfMasterSpec {
    /// Routing table bound to the VRF.
    #[serde(rename = "table")]
    pub table_id: u32,
}

impl KindData for VrfMasterSpec {
    const KIND: &'static str = "vrf";

    fn encode(&self) -> Result<Vec<u8>> {
        let mut b = AttrBuilder::new();
        b.append_attr_u32(IFLA_VRF_TABLE, self.table_id);
        Ok(b.finish())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut vrf = Self::default();
        for attr in AttrIter::strict(data) {
            let (kind, payload) = attr?;
            if kind == IFLA_VRF_TABLE {
                vrf.table_id = get::u32_ne(payload)?;
            }
        }
        Ok(vrf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let spec = VrfMasterSpec { table_id: 1001 };
        let data = spec.encode().unwrap();
        assert_eq!(data.len(), 8);
        assert_eq!(VrfMasterSpec::decode(&data).unwrap(), spec);
    }

    #[test]
    fn test_decode_short_payload() {
        let mut b = AttrBuilder::new();
        b.append_attr(IFLA_VRF_TABLE, &[1, 0]);
        assert!(VrfMasterSpec::decode(&b.finish()).is_err());
    }
}
