// plaidrpcd: standalone JSON-RPC server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use plaidcloud_rpc_server::config::ServerConfig;
use plaidcloud_rpc_server::runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plaidrpcd", about = "Serve PlaidCloud JSON-RPC methods")]
struct Args {
    /// Config file (default: ~/.plaidcloud/server.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP listen address, overriding the config.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Also serve line-delimited JSON-RPC on this Unix socket.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Local development: accept the built-in JWT secret.
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load server config")?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(socket) = args.socket {
        config.socket_path = Some(socket);
    }
    config.dev_mode |= args.dev;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    runtime::run(config).await.context("json-rpc server terminated unexpectedly")
}
