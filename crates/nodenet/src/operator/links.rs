//! Kernel address state the operators gate on.

use async_trait::async_trait;
use ipnet::IpNet;

use super::Result;
use crate::netlink::Connection;
use crate::spec::{AddressFlags, AddressStatus, Family, Scope};

/// Address lookups for readiness gates.
#[async_trait]
pub trait LinkAddressSource: Send + Sync {
    /// `None` when no such link exists.
    async fn link_index(&self, name: &str) -> Result<Option<u32>>;

    async fn addresses(&self, index: u32, family: Family) -> Result<Vec<AddressStatus>>;
}

#[async_trait]
impl LinkAddressSource for Connection {
    async fn link_index(&self, name: &str) -> Result<Option<u32>> {
        match Connection::link_index(self, name) {
            Ok(index) => Ok(Some(index)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn addresses(&self, index: u32, family: Family) -> Result<Vec<AddressStatus>> {
        let messages = self.get_addresses_by_index(u8::from(family), index).await?;

        Ok(messages
            .into_iter()
            .filter_map(|msg| {
                let addr = msg.primary_address()?;
                let address = IpNet::new(addr, msg.prefix_len()).ok()?;
                Some(AddressStatus {
                    address,
                    local: msg.local,
                    link_index: msg.ifindex(),
                    link_name: String::new(),
                    family: Family::from(msg.header.ifa_family),
                    scope: Scope::from(msg.header.ifa_scope),
                    flags: AddressFlags(msg.all_flags()),
                })
            })
            .collect())
    }
}
