//! `WG_CMD_SET_DEVICE` attribute encoding for a device patch.
//!
//! The output is the attribute stream that follows the generic netlink
//! header; resolving the family id and sending it is left to the caller.

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;

use super::types::{WgDeviceBuilder, WgPeerBuilder};
use crate::netlink::builder::AttrBuilder;

/// Wireguard generic netlink family name.
pub const WG_GENL_NAME: &str = "wireguard";

/// Wireguard generic netlink version.
pub const WG_GENL_VERSION: u8 = 1;

/// `WG_CMD_SET_DEVICE`.
pub const WG_CMD_SET_DEVICE: u8 = 1;

/// Device attributes (WGDEVICE_A_*)
mod device {
    pub const IFNAME: u16 = 2;
    pub const PRIVATE_KEY: u16 = 3;
    pub const FLAGS: u16 = 5;
    pub const LISTEN_PORT: u16 = 6;
    pub const FWMARK: u16 = 7;
    pub const PEERS: u16 = 8;

    pub const F_REPLACE_PEERS: u32 = 1 << 0;
}

/// Peer attributes (WGPEER_A_*)
mod peer {
    pub const PUBLIC_KEY: u16 = 1;
    pub const PRESHARED_KEY: u16 = 2;
    pub const FLAGS: u16 = 3;
    pub const ENDPOINT: u16 = 4;
    pub const PERSISTENT_KEEPALIVE_INTERVAL: u16 = 5;
    pub const ALLOWEDIPS: u16 = 9;
}

/// Allowed IP attributes (WGALLOWEDIP_A_*)
mod allowed_ip {
    pub const FAMILY: u16 = 1;
    pub const IPADDR: u16 = 2;
    pub const CIDR_MASK: u16 = 3;
}

/// Encode `patch` for the device named `ifname`.
pub fn encode_set_device(ifname: &str, patch: &WgDeviceBuilder) -> Vec<u8> {
    let mut b = AttrBuilder::new();
    b.append_attr_str(device::IFNAME, ifname);

    if patch.has_replace_peers() {
        b.append_attr_u32(device::FLAGS, device::F_REPLACE_PEERS);
    }
    if let Some(key) = patch.get_private_key() {
        b.append_attr(device::PRIVATE_KEY, key);
    }
    if let Some(port) = patch.get_listen_port() {
        b.append_attr_u16(device::LISTEN_PORT, port);
    }
    if let Some(mark) = patch.get_fwmark() {
        b.append_attr_u32(device::FWMARK, mark);
    }

    if !patch.get_peers().is_empty() {
        let peers = b.nest_start(device::PEERS);
        for (idx, p) in patch.get_peers().iter().enumerate() {
            append_peer(&mut b, idx as u16, p);
        }
        b.nest_end(peers);
    }

    b.finish()
}

fn append_peer(b: &mut AttrBuilder, idx: u16, p: &WgPeerBuilder) {
    let token = b.nest_start(idx);

    b.append_attr(peer::PUBLIC_KEY, p.get_public_key());
    if p.get_flags() != 0 {
        b.append_attr_u32(peer::FLAGS, p.get_flags());
    }
    if let Some(psk) = p.get_preshared_key() {
        b.append_attr(peer::PRESHARED_KEY, psk);
    }
    if let Some(endpoint) = p.get_endpoint() {
        b.append_attr(peer::ENDPOINT, &sockaddr_bytes(endpoint));
    }
    if let Some(interval) = p.get_persistent_keepalive() {
        b.append_attr_u16(peer::PERSISTENT_KEEPALIVE_INTERVAL, interval);
    }

    if !p.get_allowed_ips().is_empty() {
        let ips = b.nest_start(peer::ALLOWEDIPS);
        for (i, net) in p.get_allowed_ips().iter().enumerate() {
            append_allowed_ip(b, i as u16, net);
        }
        b.nest_end(ips);
    }

    b.nest_end(token);
}

fn append_allowed_ip(b: &mut AttrBuilder, idx: u16, net: &IpNet) {
    let token = b.nest_start(idx);
    match net.network() {
        IpAddr::V4(v4) => {
            b.append_attr_u16(allowed_ip::FAMILY, libc::AF_INET as u16);
            b.append_attr(allowed_ip::IPADDR, &v4.octets());
        }
        IpAddr::V6(v6) => {
            b.append_attr_u16(allowed_ip::FAMILY, libc::AF_INET6 as u16);
            b.append_attr(allowed_ip::IPADDR, &v6.octets());
        }
    }
    b.append_attr_u8(allowed_ip::CIDR_MASK, net.prefix_len());
    b.nest_end(token);
}

/// `struct sockaddr_in` / `struct sockaddr_in6` bytes.
fn sockaddr_bytes(addr: &SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut buf = vec![0u8; 16];
            buf[0..2].copy_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
            buf[2..4].copy_from_slice(&v4.port().to_be_bytes());
            buf[4..8].copy_from_slice(&v4.ip().octets());
            buf
        }
        SocketAddr::V6(v6) => {
            let mut buf = vec![0u8; 28];
            buf[0..2].copy_from_slice(&(libc::AF_INET6 as u16).to_ne_bytes());
            buf[2..4].copy_from_slice(&v6.port().to_be_bytes());
            buf[4..8].copy_from_slice(&v6.flowinfo().to_ne_bytes());
            buf[8..24].copy_from_slice(&v6.ip().octets());
            buf[24..28].copy_from_slice(&v6.scope_id().to_ne_bytes());
            buf
        }
    }
}
