//! Wireguard device specs and the peer differ.
//!
//! A [`WireguardSpec`] describes the desired device. [`WireguardSpec::diff`]
//! compares it against the state read back from the kernel and produces a
//! [`WgDeviceBuilder`] patch holding only what changed, which
//! [`genl::encode_set_device`] turns into a `WG_CMD_SET_DEVICE` payload.
//!
//! # Example
//!
//! ```ignore
//! use nodenet::wireguard::WireguardSpec;
//!
//! let mut desired: WireguardSpec = serde_json::from_str(json)?;
//! desired.sort();
//! let patch = desired.diff(&existing)?;
//! if !patch.is_empty() {
//!     let attrs = nodenet::wireguard::genl::encode_set_device("wg0", &patch);
//! }
//! ```

mod diff;
pub mod genl;
mod spec;
mod types;

use std::net::SocketAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use spec::{WireguardPeer, WireguardSpec};
pub use types::{WG_KEY_LEN, WgDeviceBuilder, WgKey, WgPeerBuilder, WgPeerFlags};

/// Result type for wireguard operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid wireguard key: {0}")]
    InvalidKey(String),

    #[error("invalid peer endpoint {0:?}")]
    InvalidEndpoint(String),
}

/// Decode a base64 wireguard key.
pub fn parse_key(s: &str) -> Result<WgKey> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::InvalidKey(format!("expected 32 bytes, got {}", b.len())))
}

/// Parse an `ip:port` endpoint.
pub fn parse_endpoint(s: &str) -> Result<SocketAddr> {
    s.parse()
        .map_err(|_| Error::InvalidEndpoint(s.to_string()))
}
