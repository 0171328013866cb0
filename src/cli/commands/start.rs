//! Start command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;

use crate::core::config::Config;
use crate::ops::telemetry;
use crate::rpc::{BrokerService, ForwardingServer, GrpcServer};
use crate::store::Store;

/// Start the broker server.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments - config is handled globally
}

/// Run the start command with the given config path.
pub async fn run_start(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    telemetry::init_tracing(&config.telemetry.log_level);

    let grpc = config
        .listeners
        .grpc
        .as_ref()
        .context("config has no [listeners.grpc] section")?;
    let bind_addr: std::net::SocketAddr = grpc.bind.parse()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    match &grpc.forward_to {
        Some(upstream) => {
            let forwarder = ForwardingServer::connect(upstream)
                .await
                .with_context(|| format!("failed to connect to upstream {upstream}"))?;
            run_forwarding_server(bind_addr, forwarder, shutdown_rx).await
        }
        None => {
            let store = Store::open(&config.storage.dsn)
                .with_context(|| format!("failed to open store at {}", config.storage.dsn))?;
            let server = GrpcServer::new(bind_addr, BrokerService::new(store), shutdown_rx);
            server.run().await?;
            Ok(())
        }
    }
}

async fn run_forwarding_server(
    bind_addr: std::net::SocketAddr,
    forwarder: ForwardingServer,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!(%bind_addr, "starting forwarding gRPC server");
    tonic::transport::Server::builder()
        .add_service(forwarder)
        .serve_with_shutdown(bind_addr, async move {
            loop {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await
        .context("forwarding server error")
}
