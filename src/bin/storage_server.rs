use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use docfs::config::{self, SsConfig, SsFileConfig};

/// A docfs storage server.
#[derive(Parser)]
#[command(name = "docfs-ss", version)]
struct Args {
    /// Public address advertised to clients.
    ss_ip: String,
    /// Port for direct client connections.
    #[arg(value_parser = config::port_in_range)]
    ss_port: u16,
    /// Name server address.
    ns_ip: String,
    /// Name server port.
    #[arg(value_parser = config::port_in_range)]
    ns_port: u16,
    /// Optional TOML config overlay.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let overlay: SsFileConfig = config::load(args.config.as_deref())?;
    let cfg = SsConfig {
        base_dir: overlay.base_dir.unwrap_or_else(|| SsConfig::default_base_dir(args.ss_port)),
        ip: args.ss_ip,
        port: args.ss_port,
        ns_ip: args.ns_ip,
        ns_port: args.ns_port,
    };
    docfs::ss::run(cfg).await
}
