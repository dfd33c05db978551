//! Store daemon: package search, cache refresh and installs over a
//! Unix socket.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use droidhost::config;
use droidhost::ipc::client::SessionClient;
use droidhost::ipc::server::{bind_socket, serve_store};
use droidhost::ipc::{session_socket_path, store_socket_path};
use droidhost::store::StoreService;

#[derive(Parser)]
#[command(name = "droidhost-store", version, about = "Package store daemon")]
struct Args {
    /// Path to the host configuration file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Socket path override.
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.clone()),
    )
    .init();

    let config = config::load(&args.config);
    let session = SessionClient::new(session_socket_path());
    let service = Arc::new(StoreService::new(config.store, session)?);

    let socket_path = args.socket.unwrap_or_else(store_socket_path);
    let listener = bind_socket(&socket_path)?;
    info!("droidhost-store listening on {}", socket_path.display());

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let serve = serve_store(service, listener, shutdown.clone());
    tokio::pin!(serve);

    tokio::select! {
        _ = &mut serve => {}
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    shutdown.cancel();
    let _ = std::fs::remove_file(&socket_path);
    info!("droidhost-store stopped");
    Ok(())
}
