//! Declarative wireguard device and peer specs.

use std::cmp::Ordering;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Desired state of one wireguard peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WireguardPeer {
    /// Base64 public key.
    pub public_key: String,
    /// Base64 preshared key, empty for none.
    pub preshared_key: String,
    /// `ip:port`, empty to leave the kernel's roaming endpoint alone.
    pub endpoint: String,
    /// Keepalive interval in seconds, 0 disables.
    pub persistent_keepalive_interval: u16,
    pub allowed_ips: Vec<IpNet>,
}

impl WireguardPeer {
    /// Compare an existing peer (`self`) against a desired one.
    ///
    /// An empty desired endpoint matches any existing endpoint.
    pub fn equal(&self, desired: &WireguardPeer) -> bool {
        self.public_key == desired.public_key
            && self.preshared_key == desired.preshared_key
            && self.persistent_keepalive_interval == desired.persistent_keepalive_interval
            && self.allowed_ips == desired.allowed_ips
            && (desired.endpoint.is_empty() || self.endpoint == desired.endpoint)
    }

    fn sort_allowed_ips(&mut self) {
        self.allowed_ips.sort_by(|a, b| {
            a.addr()
                .cmp(&b.addr())
                .then_with(|| a.prefix_len().cmp(&b.prefix_len()))
        });
    }
}

/// Desired state of a wireguard device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WireguardSpec {
    pub private_key: String,
    /// Derived by the kernel; only filled when decoding device state.
    pub public_key: String,
    pub listen_port: u16,
    pub firewall_mark: u32,
    pub peers: Vec<WireguardPeer>,
}

impl WireguardSpec {
    /// Sort peers by public key and each peer's allowed IPs by address, then
    /// prefix length.
    pub fn sort(&mut self) {
        self.peers.sort_by(by_key);
        for peer in &mut self.peers {
            peer.sort_allowed_ips();
        }
    }

    /// Overlay `other`: non-zero scalars win, unknown peers are appended.
    pub fn merge(&mut self, other: &WireguardSpec) {
        if !other.private_key.is_empty() {
            self.private_key = other.private_key.clone();
        }
        if other.listen_port != 0 {
            self.listen_port = other.listen_port;
        }
        if other.firewall_mark != 0 {
            self.firewall_mark = other.firewall_mark;
        }

        for peer in &other.peers {
            if !self.peers.iter().any(|p| p.public_key == peer.public_key) {
                self.peers.push(peer.clone());
            }
        }
    }

    /// Compare against a desired spec; both must be sorted.
    pub fn equal(&self, desired: &WireguardSpec) -> bool {
        self.private_key == desired.private_key
            && self.listen_port == desired.listen_port
            && self.firewall_mark == desired.firewall_mark
            && self.peers.len() == desired.peers.len()
            && self
                .peers
                .iter()
                .zip(&desired.peers)
                .all(|(have, want)| have.equal(want))
    }

    pub fn is_zero(&self) -> bool {
        self.private_key.is_empty()
            && self.listen_port == 0
            && self.firewall_mark == 0
            && self.peers.is_empty()
    }
}

pub(crate) fn by_key(a: &WireguardPeer, b: &WireguardPeer) -> Ordering {
    a.public_key.cmp(&b.public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(key: &str, ips: &[&str]) -> WireguardPeer {
        WireguardPeer {
            public_key: key.into(),
            allowed_ips: ips.iter().map(|s| s.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sort() {
        let mut spec = WireguardSpec {
            peers: vec![
                peer("b", &["10.0.0.0/24", "10.0.0.0/8", "fd00::/64", "9.0.0.0/8"]),
                peer("a", &[]),
            ],
            ..Default::default()
        };
        spec.sort();

        assert_eq!(spec.peers[0].public_key, "a");
        let ips: Vec<_> = spec.peers[1].allowed_ips.iter().map(|n| n.to_string()).collect();
        assert_eq!(ips, ["9.0.0.0/8", "10.0.0.0/8", "10.0.0.0/24", "fd00::/64"]);
    }

    #[test]
    fn test_merge() {
        let mut spec = WireguardSpec {
            private_key: "priv".into(),
            listen_port: 51820,
            peers: vec![peer("a", &["10.0.0.0/8"])],
            ..Default::default()
        };
        spec.merge(&WireguardSpec {
            firewall_mark: 7,
            peers: vec![peer("a", &["192.168.0.0/16"]), peer("b", &[])],
            ..Default::default()
        });

        assert_eq!(spec.private_key, "priv");
        assert_eq!(spec.listen_port, 51820);
        assert_eq!(spec.firewall_mark, 7);
        assert_eq!(spec.peers.len(), 2);
        assert_eq!(spec.peers[0].allowed_ips[0].to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_peer_equal_endpoint() {
        let mut have = peer("a", &["10.0.0.0/8"]);
        have.endpoint = "192.0.2.1:51820".into();

        let mut want = have.clone();
        want.endpoint.clear();
        assert!(have.equal(&want));

        want.endpoint = "192.0.2.2:51820".into();
        assert!(!have.equal(&want));

        let mut want = have.clone();
        want.persistent_keepalive_interval = 25;
        assert!(!have.equal(&want));
    }

    #[test]
    fn test_equal_and_zero() {
        let spec = WireguardSpec {
            listen_port: 1,
            peers: vec![peer("a", &[])],
            ..Default::default()
        };
        assert!(spec.equal(&spec.clone()));
        assert!(!spec.equal(&WireguardSpec::default()));
        assert!(!spec.is_zero());
        assert!(WireguardSpec::default().is_zero());
    }

    #[test]
    fn test_json() {
        let spec: WireguardSpec = serde_json::from_str(
            r#"{"privateKey":"k","listenPort":30000,"peers":[{"publicKey":"p","allowedIps":["10.0.0.0/8"]}]}"#,
        )
        .unwrap();
        assert_eq!(spec.listen_port, 30000);
        assert_eq!(spec.peers[0].allowed_ips.len(), 1);
        assert_eq!(spec.firewall_mark, 0);
    }
}
