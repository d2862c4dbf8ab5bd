use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use wstun::config::ServerConfig;
use wstun::egress::TcpConnector;
use wstun::http;
use wstun::tunnel::manager::TunnelManager;

#[derive(Parser)]
struct Args {
    /// address to listen on for websocket upgrades
    #[clap(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// number of request slots per tunnel
    #[clap(long, default_value_t = 100)]
    slots: u16,

    /// keepalive period in milliseconds
    #[clap(long, default_value_t = 10_000)]
    keepalive_millis: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let listen_addr: SocketAddr = args.listen.parse()?;
    let mut config = ServerConfig::new(listen_addr);
    config.slots_per_tunnel = args.slots;
    config.keepalive_interval = Duration::from_millis(args.keepalive_millis);
    config.validate()?;
    let config = Arc::new(config);

    let manager = TunnelManager::new(config.clone(), Arc::new(TcpConnector));

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    http::serve(listener, manager).await
}
