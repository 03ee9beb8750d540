//! Metrics definitions for the MCU bridge.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mcu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `reason` on removals: explicit, idle, shutdown
//! - `reason` on add rejections: bounded by `BridgeError::rejection_reason`
//! - `reason` on degradation: underrun, format
//!
//! No label carries a room number, member name or id.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Monitor sweeps touch every conference; expected well under 10ms
        .set_buckets_for_metric(
            Matcher::Prefix("mcu_monitor_sweep".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set monitor sweep buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry Metrics (Gauges)
// ============================================================================

/// Set the number of live conferences.
///
/// Metric: `mcu_conferences_active`
pub fn set_conferences_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mcu_conferences_active").set(count as f64);
}

/// Adjust the number of members across all conferences.
///
/// Metric: `mcu_members_active`
pub fn increment_members_active() {
    gauge!("mcu_members_active").increment(1.0);
}

pub fn decrement_members_active() {
    gauge!("mcu_members_active").decrement(1.0);
}

// ============================================================================
// Lifecycle Metrics (Counters)
// ============================================================================

/// Metric: `mcu_conferences_created_total`
pub fn record_conference_created() {
    counter!("mcu_conferences_created_total").increment(1);
}

/// Record a conference leaving the registry.
///
/// Metric: `mcu_conferences_removed_total`
/// Labels: `reason` (explicit, idle, shutdown)
pub fn record_conference_removed(reason: &'static str) {
    counter!("mcu_conferences_removed_total", "reason" => reason).increment(1);
}

/// Record a refused add-member request.
///
/// Metric: `mcu_member_add_rejected_total`
/// Labels: `reason`
pub fn record_member_add_rejected(reason: &'static str) {
    counter!("mcu_member_add_rejected_total", "reason" => reason).increment(1);
}

// ============================================================================
// Audio Path Metrics
// ============================================================================

/// Record a reader that fell out of its source's buffer and was moved forward.
///
/// Metric: `mcu_audio_reader_resync_total`
///
/// Sustained non-zero rate means a listener is reading slower than the
/// buffer window allows.
pub fn record_reader_resync() {
    counter!("mcu_audio_reader_resync_total").increment(1);
}

/// Record media degraded to silence.
///
/// Metric: `mcu_audio_degraded_total`
/// Labels: `reason` (underrun, format)
pub fn record_audio_degraded(reason: &'static str) {
    counter!("mcu_audio_degraded_total", "reason" => reason).increment(1);
}

// ============================================================================
// Monitor Metrics
// ============================================================================

/// Metric: `mcu_monitor_sweep_duration_seconds`
pub fn record_monitor_sweep(duration: Duration) {
    histogram!("mcu_monitor_sweep_duration_seconds").record(duration.as_secs_f64());
}

/// Record a housekeeping check that did not finish inside its timeout.
///
/// Metric: `mcu_monitor_checks_stalled_total`
///
/// ALERT: a persistent rate points at a wedged collaborator.
pub fn record_monitor_check_stalled() {
    counter!("mcu_monitor_checks_stalled_total").increment(1);
}
