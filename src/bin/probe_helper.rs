//! Probe helper server
//!
//! Runs the probe listener, the receiver listener (with `/healthz`) and,
//! when built with `transport-grpc` and given a port, the gRPC service.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use probe_helper::config::ServerConfig;
use probe_helper::transport::http;
use probe_helper::{ProbeHelper, TransportError};

async fn bind(addr: std::net::SocketAddr) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr).await.map_err(|e| TransportError::Listener {
        message: format!("failed to bind {addr}: {e}"),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();
    let clients = config.build_clients()?;
    info!(?clients, "collaborators configured");

    let helper = Arc::new(ProbeHelper::new(config.helper_config(), clients)?);
    let cancel = CancellationToken::new();

    let probe_listener = bind(config.probe_addr()).await?;
    let receiver_listener = bind(config.receiver_addr()).await?;
    info!(
        probe = %config.probe_addr(),
        receiver = %config.receiver_addr(),
        version = env!("CARGO_PKG_VERSION"),
        "probe helper listening"
    );

    let mut tasks: JoinSet<Result<(), TransportError>> = JoinSet::new();
    tasks.spawn({
        let helper = Arc::clone(&helper);
        let cancel = cancel.clone();
        async move {
            helper.run(cancel).await;
            Ok(())
        }
    });
    tasks.spawn(http::serve(
        probe_listener,
        http::probe_router(Arc::clone(&helper)),
        cancel.clone(),
    ));
    tasks.spawn(http::serve(
        receiver_listener,
        http::receiver_router(Arc::clone(&helper)),
        cancel.clone(),
    ));

    if let Some(addr) = config.grpc_addr() {
        #[cfg(feature = "transport-grpc")]
        {
            let listener = bind(addr).await?;
            info!(grpc = %addr, "gRPC service listening");
            tasks.spawn(probe_helper::transport::grpc::serve(
                Arc::clone(&helper),
                listener,
                cancel.clone(),
            ));
        }
        #[cfg(not(feature = "transport-grpc"))]
        warn!(grpc = %addr, "gRPC port set but the transport-grpc feature is disabled");
    }

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for Ctrl+C");
            }
            info!("shutdown requested");
        }
        Some(joined) = tasks.join_next() => {
            match joined {
                Ok(Ok(())) => warn!("a listener stopped unexpectedly"),
                Ok(Err(err)) => error!(error = %err, "listener failed"),
                Err(err) => error!(error = %err, "listener task panicked"),
            }
        }
    }

    cancel.cancel();
    helper.shutdown();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Err(err)) = joined {
            error!(error = %err, "listener failed during shutdown");
        }
    }

    info!("shut down");
    Ok(())
}
