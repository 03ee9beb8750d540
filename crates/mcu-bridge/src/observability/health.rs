//! Health endpoints for the MCU bridge.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we take new conferences?)
//!
//! The `/metrics` endpoint is merged in by the binary from the Prometheus
//! handle.
//!
//! Readiness requires both the startup flag and spare conference capacity:
//! a bridge at its conference limit reports 503 so the load balancer sends
//! new rooms elsewhere. The body carries `conferences=<live>/<max>`.

use crate::manager::ConferenceManager;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once the monitor and health server are up; cleared at shutdown.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ProbeState {
    health: Arc<HealthState>,
    manager: Arc<ConferenceManager>,
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>, manager: Arc<ConferenceManager>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(ProbeState {
            health: health_state,
            manager,
        })
}

async fn liveness_handler(State(state): State<ProbeState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<ProbeState>) -> (StatusCode, String) {
    let count = state.manager.conference_count();
    let max = state.manager.max_conference_count();
    let body = format!("conferences={count}/{max}");

    if state.health.is_ready() && count < max {
        (StatusCode::OK, format!("ready {body}"))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, format!("not ready {body}"))
    }
}
