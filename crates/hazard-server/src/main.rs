//! # Airfield Hazard Coordinator
//!
//! Main entry point. Receives object detections from the inference
//! producer, tracks runway occupancy and first sightings, and serves the
//! admin, bird-subsystem and pilot consoles over their own TCP channels.

mod config;
mod error;
mod handlers;
mod ops;
mod pipeline;
mod state;
mod tasks;

use crate::config::ServerConfig;
use crate::handlers::{AdminHandler, BirdService, IntakeService, JsonChannel, PilotService};
use crate::state::{build_gateway, CoordinationCore};

use hazard_channels::{bind, serve, ConnectionHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Airfield Hazard Coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::load()?;
    info!("Configuration loaded");
    info!("   Intake Port: {}", config.intake_port);
    info!("   Admin Port: {}", config.admin_port);
    info!("   Bird Port: {}", config.bird_port);
    info!("   Pilot Port: {}", config.pilot_port);
    info!("   Ops Port: {}", config.ops_port);
    info!("   Database: {:?} {:?}", config.db.backend, config.db.hosts);

    let cancel = CancellationToken::new();
    let gateway = build_gateway(&config.db).await;
    let core = CoordinationCore::new(config.clone(), gateway, cancel.clone())?;

    let mut handles = tasks::spawn_background(&core);

    // A channel that cannot bind is logged and left down; the others keep running
    let channels = [
        spawn_channel(&config.addr(config.intake_port), JsonChannel::new(IntakeService::new(core.clone())), &cancel).await,
        spawn_channel(&config.addr(config.admin_port), AdminHandler::new(core.clone()), &cancel).await,
        spawn_channel(&config.addr(config.bird_port), JsonChannel::new(BirdService::new(core.clone())), &cancel).await,
        spawn_channel(&config.addr(config.pilot_port), JsonChannel::new(PilotService::new(core.clone())), &cancel).await,
    ];
    handles.extend(channels.into_iter().flatten());

    let ops_addr = config.addr(config.ops_port);
    match tokio::net::TcpListener::bind(&ops_addr).await {
        Ok(listener) => {
            info!("Health and metrics at http://{}", ops_addr);
            let app = ops::create_router(core.clone());
            let shutdown = cancel.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app.into_make_service())
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                {
                    error!("Ops server error: {}", e);
                }
            }));
        }
        Err(e) => error!("Failed to bind ops endpoint {}: {}", ops_addr, e),
    }

    shutdown_signal().await;
    cancel.cancel();

    if !core.calibration_worker.stop().await {
        warn!("Calibration worker abandoned");
    }
    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(3), handle).await.is_err() {
            warn!("Background task did not stop in time");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn spawn_channel<H: ConnectionHandler>(
    addr: &str,
    handler: H,
    cancel: &CancellationToken,
) -> Option<JoinHandle<()>> {
    let channel = handler.channel();
    let listener = match bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(channel, "Channel unavailable: {}", e);
            return None;
        }
    };

    let cancel = cancel.clone();
    Some(tokio::spawn(async move {
        if let Err(e) = serve(listener, Arc::new(handler), cancel).await {
            error!(channel, "Listener failed: {}", e);
        }
    }))
}

/// Initialize logging with tracing
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,hazard_server=debug,hazard_tracker=debug")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
