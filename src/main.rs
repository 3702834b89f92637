//! FileDrop server binary.
//!
//! Serves a single directory over HTTP(S): an HTML listing, streamed
//! downloads, multipart uploads and a public `/monitor` counter endpoint,
//! optionally gated by a shared Basic auth password.

mod atomic;
mod auth;
mod config;
mod dispatch;
mod error;
mod files;
mod http;
mod logging;
mod monitor;
mod multipart;
mod page;
mod state;
mod storage;
mod tls;
mod upload;

use axum::Router;
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum_server::Handle;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use crate::config::{Args, SHUTDOWN_GRACE_SECS, ServerConfig};
use crate::dispatch::build_router;
use crate::logging::LogSink;
use crate::state::AppState;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    let config = ServerConfig::from_args(args)?;
    logging::init_logging(LogSink::open(&config.log_file));

    let state = AppState::new(config);
    if let Err(err) = state.storage.ensure_root().await {
        error!(dir = ?state.storage.root_path(), error = %err, "cannot create serving directory");
        return Err(err);
    }

    let config = state.config.clone();
    let app = build_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let handle = Handle::new();

    info!(
        dir = ?state.storage.root_path(),
        auth = config.password.is_some(),
        max_concurrent = config.max_concurrent_requests,
        "serving files"
    );

    tokio::select! {
        result = serve(&config, app, handle.clone()) => {
            if let Err(err) = &result {
                error!(error = %err, "server stopped");
            }
            result?
        },
        _ = shutdown_signal(handle.clone()) => {}
    }

    let totals = state.counters.snapshot();
    info!(
        total_requests = totals.total_requests,
        error_count = totals.error_count,
        "shutdown complete"
    );
    Ok(())
}

async fn serve(
    config: &ServerConfig,
    app: IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
    handle: Handle,
) -> Result<(), std::io::Error> {
    let addr = config.bind_addr();
    if config.tls {
        let tls_config = tls::build_rustls_config(config).await?;
        info!("🔒 Starting HTTPS server at {}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app)
            .await
    } else {
        info!("🚀 Starting HTTP server at {}", addr);
        axum_server::bind(addr).handle(handle).serve(app).await
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
