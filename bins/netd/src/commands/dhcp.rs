//! netd dhcp4/dhcp6 command implementation.
//!
//! Runs one operator on a link until SIGINT/SIGTERM and logs every spec
//! snapshot it publishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use nodenet::dhcp::{Udp4Transport, Udp6Transport};
use nodenet::netlink::Connection;
use nodenet::operator::{Dhcp4, Dhcp4Config, Dhcp6, Dhcp6Config, Notifier, Operator};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::read_json;

#[derive(Args)]
pub struct Dhcp4Cmd {
    /// Link to run the client on.
    link: String,

    /// Operator config (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds allowed for one exchange.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

impl Dhcp4Cmd {
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let config: Dhcp4Config = match &self.config {
            Some(path) => read_json(path)?,
            None => Dhcp4Config::default(),
        };
        let transport =
            Udp4Transport::new(&self.link)?.with_timeout(Duration::from_secs(self.timeout));
        let links = Connection::new()?;

        drive(Arc::new(Dhcp4::new(self.link, config, transport, links)), token).await
    }
}

#[derive(Args)]
pub struct Dhcp6Cmd {
    /// Link to run the client on.
    link: String,

    /// Operator config (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client DUID as hex, overriding the config.
    #[arg(long)]
    duid: Option<String>,

    /// Seconds allowed for one exchange.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

impl Dhcp6Cmd {
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let mut config: Dhcp6Config = match &self.config {
            Some(path) => read_json(path)?,
            None => Dhcp6Config::default(),
        };
        if let Some(duid) = self.duid {
            config.duid = duid;
        }

        let transport =
            Udp6Transport::new(&self.link)?.with_timeout(Duration::from_secs(self.timeout));
        let links = Connection::new()?;

        drive(Arc::new(Dhcp6::new(self.link, config, transport, links)?), token).await
    }
}

async fn drive<O: Operator + 'static>(
    operator: Arc<O>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let (notifier, mut rx) = Notifier::channel();

    let task = tokio::spawn({
        let operator = operator.clone();
        let token = token.clone();
        async move { operator.run(token, notifier).await }
    });
    info!(prefix = %operator.prefix(), "operator started");

    // The channel closes once `run` returns and drops the notifier.
    while rx.recv().await.is_some() {
        report(operator.as_ref())?;
    }

    task.await?;
    info!(prefix = %operator.prefix(), "operator stopped");
    Ok(())
}

fn report<O: Operator>(operator: &O) -> anyhow::Result<()> {
    info!(
        prefix = %operator.prefix(),
        addresses = %serde_json::to_string(&operator.address_specs())?,
        links = %serde_json::to_string(&operator.link_specs())?,
        routes = %serde_json::to_string(&operator.route_specs())?,
        hostnames = %serde_json::to_string(&operator.hostname_specs())?,
        resolvers = %serde_json::to_string(&operator.resolver_specs())?,
        time_servers = %serde_json::to_string(&operator.time_server_specs())?,
        "specs published"
    );
    Ok(())
}
