//! netd link command implementation.
//!
//! Encodes kind specs to the `IFLA_INFO_DATA` attribute stream (as hex) and
//! decodes such a stream back into a spec.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};
use nodenet::link::{BondMasterSpec, BridgeMasterSpec, KindData, VlanSpec, VrfMasterSpec};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Output, read_json};

#[derive(Args)]
pub struct LinkCmd {
    #[command(subcommand)]
    action: LinkAction,
}

#[derive(Subcommand)]
enum LinkAction {
    /// Encode a JSON kind spec as hex attributes.
    Encode {
        /// Link kind.
        #[arg(short, long, value_enum)]
        kind: Kind,

        /// Leave zero bond tunables alone instead of applying defaults.
        #[arg(long)]
        no_defaults: bool,

        /// Spec file ("-" for stdin).
        #[arg(default_value = "-")]
        file: PathBuf,
    },

    /// Decode hex attributes into a JSON kind spec.
    Decode {
        /// Link kind.
        #[arg(short, long, value_enum)]
        kind: Kind,

        /// Hex-encoded attribute stream.
        data: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Bond,
    Bridge,
    Vlan,
    Vrf,
}

impl LinkCmd {
    pub fn run(self, out: &Output) -> anyhow::Result<()> {
        match self.action {
            LinkAction::Encode {
                kind,
                no_defaults,
                file,
            } => {
                let data = match kind {
                    Kind::Bond => {
                        let mut spec: BondMasterSpec = read_json(&file)?;
                        if !no_defaults {
                            spec.fill_defaults();
                        }
                        spec.encode()?
                    }
                    Kind::Bridge => encode::<BridgeMasterSpec>(&file)?,
                    Kind::Vlan => encode::<VlanSpec>(&file)?,
                    Kind::Vrf => encode::<VrfMasterSpec>(&file)?,
                };
                println!("{}", hex::encode(data));
                Ok(())
            }
            LinkAction::Decode { kind, data } => {
                let data = hex::decode(data.trim()).context("attribute data is not hex")?;
                match kind {
                    Kind::Bond => decode::<BondMasterSpec>(&data, out),
                    Kind::Bridge => decode::<BridgeMasterSpec>(&data, out),
                    Kind::Vlan => decode::<VlanSpec>(&data, out),
                    Kind::Vrf => decode::<VrfMasterSpec>(&data, out),
                }
            }
        }
    }
}

fn encode<T: KindData + DeserializeOwned>(file: &Path) -> anyhow::Result<Vec<u8>> {
    let spec: T = read_json(file)?;
    Ok(spec.encode()?)
}

fn decode<T: KindData + Serialize>(data: &[u8], out: &Output) -> anyhow::Result<()> {
    let spec = T::decode(data).with_context(|| format!("decoding {} data", T::KIND))?;
    out.print(&spec)
}
