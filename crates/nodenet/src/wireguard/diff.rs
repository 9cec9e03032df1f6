//! Minimal patch between two wireguard specs.

use std::cmp::Ordering;

use super::spec::{WireguardPeer, WireguardSpec, by_key};
use super::types::{WgDeviceBuilder, WgPeerBuilder};
use super::{Result, parse_endpoint, parse_key};

impl WireguardSpec {
    /// Compute the patch that turns `existing` into `self`.
    ///
    /// Both specs must be sorted (see [`WireguardSpec::sort`]). Scalars are
    /// only set when they differ; a desired listen port of 0 lets the kernel
    /// keep whatever port it has. Peers are merged by public key: existing
    /// peers missing from `self` are removed, new or changed peers are
    /// (re)added with their allowed IPs replaced.
    pub fn diff(&self, existing: &WireguardSpec) -> Result<WgDeviceBuilder> {
        let mut patch = WgDeviceBuilder::new();

        if self.private_key != existing.private_key {
            patch = patch.private_key(parse_key(&self.private_key)?);
        }
        if self.listen_port != 0 && self.listen_port != existing.listen_port {
            patch = patch.listen_port(self.listen_port);
        }
        if self.firewall_mark != existing.firewall_mark {
            patch = patch.fwmark(self.firewall_mark);
        }

        let (mut left, mut right) = (0, 0);
        while left < existing.peers.len() || right < self.peers.len() {
            let order = match (existing.peers.get(left), self.peers.get(right)) {
                (Some(have), Some(want)) => by_key(have, want),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };

            match order {
                Ordering::Less => {
                    let have = &existing.peers[left];
                    patch = patch.peer(WgPeerBuilder::new(parse_key(&have.public_key)?).remove());
                    left += 1;
                }
                Ordering::Greater => {
                    patch = patch.peer(peer_config(&self.peers[right])?);
                    right += 1;
                }
                Ordering::Equal => {
                    let (have, want) = (&existing.peers[left], &self.peers[right]);
                    if !have.equal(want) {
                        patch = patch.peer(peer_config(want)?);
                    }
                    left += 1;
                    right += 1;
                }
            }
        }

        Ok(patch)
    }
}

fn peer_config(peer: &WireguardPeer) -> Result<WgPeerBuilder> {
    let mut config = WgPeerBuilder::new(parse_key(&peer.public_key)?)
        .replace_allowed_ips()
        .persistent_keepalive(peer.persistent_keepalive_interval)
        .allowed_ips(peer.allowed_ips.iter().copied());

    if !peer.preshared_key.is_empty() {
        config = config.preshared_key(parse_key(&peer.preshared_key)?);
    }
    if !peer.endpoint.is_empty() {
        config = config.endpoint(parse_endpoint(&peer.endpoint)?);
    }

    Ok(config)
}
