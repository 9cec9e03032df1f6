//! netd wg command implementation.

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Subcommand};
use nodenet::wireguard::{WgDeviceBuilder, WgPeerBuilder, WireguardSpec, genl};
use serde_json::{Value, json};

use super::{Output, read_json};

#[derive(Args)]
pub struct WgCmd {
    #[command(subcommand)]
    action: WgAction,
}

#[derive(Subcommand)]
enum WgAction {
    /// Compute the patch turning the existing device into the desired one.
    Diff {
        /// Desired device spec.
        desired: PathBuf,

        /// Device state as currently configured.
        existing: PathBuf,

        /// Print the WG_CMD_SET_DEVICE attributes for this device as hex
        /// instead of the JSON summary.
        #[arg(long, value_name = "IFNAME")]
        encode: Option<String>,
    },
}

impl WgCmd {
    pub fn run(self, out: &Output) -> anyhow::Result<()> {
        match self.action {
            WgAction::Diff {
                desired,
                existing,
                encode,
            } => {
                let mut desired: WireguardSpec = read_json(&desired)?;
                let mut existing: WireguardSpec = read_json(&existing)?;
                desired.sort();
                existing.sort();

                let patch = desired.diff(&existing)?;
                match encode {
                    Some(ifname) => {
                        println!("{}", hex::encode(genl::encode_set_device(&ifname, &patch)));
                        Ok(())
                    }
                    None => out.print(&patch_to_json(&patch)),
                }
            }
        }
    }
}

fn patch_to_json(patch: &WgDeviceBuilder) -> Value {
    let mut obj = json!({
        "replacePeers": patch.has_replace_peers(),
        "peers": patch.get_peers().iter().map(peer_to_json).collect::<Vec<_>>(),
    });

    if patch.get_private_key().is_some() {
        // Never echo the private key.
        obj["privateKey"] = json!("(changed)");
    }
    if let Some(port) = patch.get_listen_port() {
        obj["listenPort"] = json!(port);
    }
    if let Some(mark) = patch.get_fwmark() {
        obj["firewallMark"] = json!(mark);
    }

    obj
}

fn peer_to_json(peer: &WgPeerBuilder) -> Value {
    let mut obj = json!({
        "publicKey": STANDARD.encode(peer.get_public_key()),
    });

    if peer.is_remove() {
        obj["remove"] = json!(true);
        return obj;
    }

    obj["replaceAllowedIPs"] = json!(peer.is_replace_allowed_ips());
    obj["allowedIPs"] = json!(
        peer.get_allowed_ips()
            .iter()
            .map(|net| net.to_string())
            .collect::<Vec<_>>()
    );
    if peer.get_preshared_key().is_some() {
        obj["presharedKey"] = json!("(set)");
    }
    if let Some(endpoint) = peer.get_endpoint() {
        obj["endpoint"] = json!(endpoint.to_string());
    }
    if let Some(interval) = peer.get_persistent_keepalive() {
        obj["persistentKeepaliveInterval"] = json!(interval);
    }

    obj
}
