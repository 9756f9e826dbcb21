mod gather;

use clap::Parser;
use clap::Subcommand;
use icegather::network::NetworkType;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Command::Gather(options) => crate::gather::gather(options).await?,
    };
    Ok(())
}

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gathers local candidates once and prints them.
    Gather(GatherOptions),
}

#[derive(clap::Args)]
pub struct GatherOptions {
    /// Network types to gather on, e.g. `udp4`. Defaults to UDP over IPv4 and IPv6.
    #[arg(long = "network-type")]
    network_types: Vec<NetworkType>,

    /// Only gather on these interfaces.
    #[arg(long = "interface")]
    interfaces: Vec<String>,

    /// 1:1 NAT entry in the form of `external` or `external/local`.
    #[arg(long = "nat-1to1")]
    nat_1to1_ips: Vec<String>,

    /// Advertise 1:1 NAT addresses as server-reflexive candidates.
    #[arg(long = "nat-1to1-srflx")]
    nat_1to1_srflx: bool,

    #[arg(long, default_value_t = 0)]
    port_min: u16,

    #[arg(long, default_value_t = 0)]
    port_max: u16,

    /// Print one JSON object per candidate.
    #[arg(long)]
    json: bool,
}
