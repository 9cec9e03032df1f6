//! Wireguard configuration patch types.

use std::net::SocketAddr;

use ipnet::IpNet;

/// Size of a wireguard key in bytes.
pub const WG_KEY_LEN: usize = 32;

/// Parsed wireguard key.
pub type WgKey = [u8; WG_KEY_LEN];

/// Device-level patch for `WG_CMD_SET_DEVICE`.
///
/// Unset scalars are left untouched by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgDeviceBuilder {
    private_key: Option<WgKey>,
    listen_port: Option<u16>,
    fwmark: Option<u32>,
    replace_peers: bool,
    peers: Vec<WgPeerBuilder>,
}

impl WgDeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn private_key(mut self, key: WgKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn fwmark(mut self, mark: u32) -> Self {
        self.fwmark = Some(mark);
        self
    }

    /// Drop all peers not named in this patch.
    pub fn replace_peers(mut self) -> Self {
        self.replace_peers = true;
        self
    }

    pub fn peer(mut self, peer: WgPeerBuilder) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn has_replace_peers(&self) -> bool {
        self.replace_peers
    }

    pub fn get_private_key(&self) -> Option<&WgKey> {
        self.private_key.as_ref()
    }

    pub fn get_listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn get_fwmark(&self) -> Option<u32> {
        self.fwmark
    }

    pub fn get_peers(&self) -> &[WgPeerBuilder] {
        &self.peers
    }

    /// Check whether applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.private_key.is_none()
            && self.listen_port.is_none()
            && self.fwmark.is_none()
            && !self.replace_peers
            && self.peers.is_empty()
    }
}

/// Peer flags for `WGPEER_A_FLAGS`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WgPeerFlags {
    RemoveMe = 1 << 0,
    /// Replace the peer's allowed IPs instead of appending.
    ReplaceAllowedIps = 1 << 1,
}

/// Patch for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgPeerBuilder {
    public_key: WgKey,
    preshared_key: Option<WgKey>,
    endpoint: Option<SocketAddr>,
    persistent_keepalive: Option<u16>,
    allowed_ips: Vec<IpNet>,
    flags: u32,
}

impl WgPeerBuilder {
    pub fn new(public_key: WgKey) -> Self {
        Self {
            public_key,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive: None,
            allowed_ips: Vec::new(),
            flags: 0,
        }
    }

    pub fn preshared_key(mut self, key: WgKey) -> Self {
        self.preshared_key = Some(key);
        self
    }

    pub fn endpoint(mut self, addr: SocketAddr) -> Self {
        self.endpoint = Some(addr);
        self
    }

    /// Keepalive interval in seconds, 0 disables.
    pub fn persistent_keepalive(mut self, interval: u16) -> Self {
        self.persistent_keepalive = Some(interval);
        self
    }

    pub fn allowed_ips(mut self, ips: impl IntoIterator<Item = IpNet>) -> Self {
        self.allowed_ips.extend(ips);
        self
    }

    pub fn replace_allowed_ips(mut self) -> Self {
        self.flags |= WgPeerFlags::ReplaceAllowedIps as u32;
        self
    }

    pub fn remove(mut self) -> Self {
        self.flags |= WgPeerFlags::RemoveMe as u32;
        self
    }

    pub fn get_public_key(&self) -> &WgKey {
        &self.public_key
    }

    pub fn get_preshared_key(&self) -> Option<&WgKey> {
        self.preshared_key.as_ref()
    }

    pub fn get_endpoint(&self) -> Option<&SocketAddr> {
        self.endpoint.as_ref()
    }

    pub fn get_persistent_keepalive(&self) -> Option<u16> {
        self.persistent_keepalive
    }

    pub fn get_allowed_ips(&self) -> &[IpNet] {
        &self.allowed_ips
    }

    pub fn get_flags(&self) -> u32 {
        self.flags
    }

    pub fn is_remove(&self) -> bool {
        self.flags & WgPeerFlags::RemoveMe as u32 != 0
    }

    pub fn is_replace_allowed_ips(&self) -> bool {
        self.flags & WgPeerFlags::ReplaceAllowedIps as u32 != 0
    }
}
