//! netd - node network configuration tool.

mod commands;
mod shutdown;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "netd", version, about = "Node network configuration tool")]
struct Cli {
    /// Pretty print JSON output.
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile an nftables rule.
    Nft(commands::nft::NftCmd),

    /// Encode and decode link kind data.
    #[command(visible_alias = "l")]
    Link(commands::link::LinkCmd),

    /// Compute wireguard device patches.
    Wg(commands::wg::WgCmd),

    /// Run the DHCPv4 operator on a link.
    Dhcp4(commands::dhcp::Dhcp4Cmd),

    /// Run the DHCPv6 operator on a link.
    Dhcp6(commands::dhcp::Dhcp6Cmd),
}

impl Command {
    /// Operators run until signalled and report what they publish.
    fn log_level(&self) -> Level {
        match self {
            Command::Dhcp4(_) | Command::Dhcp6(_) => Level::INFO,
            _ => Level::WARN,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.command.log_level().into()),
        )
        .init();

    let out = commands::Output { pretty: cli.pretty };

    let result = match cli.command {
        Command::Nft(cmd) => cmd.run(&out),
        Command::Link(cmd) => cmd.run(&out),
        Command::Wg(cmd) => cmd.run(&out),
        Command::Dhcp4(cmd) => cmd.run(shutdown::token()).await,
        Command::Dhcp6(cmd) => cmd.run(shutdown::token()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
