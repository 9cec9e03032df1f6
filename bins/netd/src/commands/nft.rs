//! netd nft command implementation.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use nodenet::nftables::Rule;

use super::{Output, read_json};

#[derive(Args)]
pub struct NftCmd {
    #[command(subcommand)]
    action: NftAction,
}

#[derive(Subcommand)]
enum NftAction {
    /// Compile a JSON rule into instruction lists and sets.
    Compile {
        /// Rule file ("-" for stdin).
        #[arg(default_value = "-")]
        file: PathBuf,
    },
}

impl NftCmd {
    pub fn run(self, out: &Output) -> anyhow::Result<()> {
        match self.action {
            NftAction::Compile { file } => {
                let rule: Rule = read_json(&file)?;
                let compiled = rule.compile()?;
                out.print(&compiled)
            }
        }
    }
}
