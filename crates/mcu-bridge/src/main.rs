//! MCU Bridge
//!
//! Conference mixing service. Signaling and transport layers embed the
//! library and feed members into the shared `ConferenceManager`; this binary
//! hosts the manager with its monitor and the operational endpoints.
//!
//! # Servers
//!
//! - HTTP server for health and metrics (default: 0.0.0.0:8082)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (text or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the conference manager and start its monitor
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::config::LogFormat;
use mcu_bridge::config::Config;
use mcu_bridge::external::Collaborators;
use mcu_bridge::manager::ConferenceManager;
use mcu_bridge::observability::{health_router, init_metrics_recorder, HealthState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for the monitor to finish its current sweep.
const MONITOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it chooses the log format
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    let filter = EnvFilter::try_new(&config.observability.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(mcu_bridge::config::DEFAULT_LOG_FILTER));
    match config.observability.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    info!("Starting MCU bridge");
    info!(
        mcu_id = %config.mcu_id,
        health_bind_address = %config.health_bind_address,
        max_conferences = config.max_conferences,
        max_members_per_conference = config.max_members_per_conference,
        audio_buffer_ms = config.audio_buffer_ms,
        monitor_interval_ms = config.monitor_interval_ms,
        empty_conference_grace_seconds = config.empty_conference_grace_seconds,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let manager = Arc::new(ConferenceManager::new(
        config.to_manager_config(),
        Collaborators::default(),
    ));

    let shutdown_token = CancellationToken::new();
    let monitor_handle = manager.start_monitor(shutdown_token.child_token());
    info!("Conference monitor started");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let health_router = health_router(Arc::clone(&health_state), Arc::clone(&manager));

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router.merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    let health_handle = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("MCU bridge running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so no new rooms are routed here
    health_state.set_not_ready();

    shutdown_token.cancel();

    match tokio::time::timeout(MONITOR_SHUTDOWN_TIMEOUT, monitor_handle).await {
        Ok(Ok(())) => info!("Conference monitor stopped"),
        Ok(Err(e)) => warn!(error = %e, "Conference monitor task failed"),
        Err(_) => warn!(
            timeout_secs = MONITOR_SHUTDOWN_TIMEOUT.as_secs(),
            "Conference monitor did not stop in time"
        ),
    }

    let removed = manager.clear_conference_list();
    info!(removed, "Conferences cleared");

    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task failed");
    }

    info!("MCU bridge shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
