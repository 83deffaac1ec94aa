use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use docfs::config::{self, NsConfig, NsFileConfig};

/// The docfs name server.
#[derive(Parser)]
#[command(name = "docfs-ns", version)]
struct Args {
    /// Address to listen on.
    ip: String,
    /// Port to listen on.
    #[arg(value_parser = config::port_in_range)]
    port: u16,
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
    let overlay: NsFileConfig = config::load(args.config.as_deref())?;
    let cfg = NsConfig {
        ip: args.ip,
        port: args.port,
        exec_enabled: overlay.exec_enabled.unwrap_or(true),
    };
    docfs::ns::run(cfg).await
}
