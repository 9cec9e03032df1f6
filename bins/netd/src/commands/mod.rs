//! Subcommand implementations.

pub mod dhcp;
pub mod link;
pub mod nft;
pub mod wg;

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Stdout formatting shared by the one-shot commands.
pub struct Output {
    pub pretty: bool,
}

impl Output {
    pub fn print<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{}", text);
        Ok(())
    }
}

/// Read a JSON document from `path`, or stdin when it is `-`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };

    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
