//! Observability for the MCU bridge.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields. Room
//! numbers and member ids appear in log fields only, never as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mcu_conferences_active` | Gauge | none | Live conferences |
//! | `mcu_members_active` | Gauge | none | Members across all conferences |
//! | `mcu_conferences_created_total` | Counter | none | Conference creations |
//! | `mcu_conferences_removed_total` | Counter | `reason` | Conference removals |
//! | `mcu_member_add_rejected_total` | Counter | `reason` | Refused joins |
//! | `mcu_audio_reader_resync_total` | Counter | none | Listeners that fell a full buffer behind |
//! | `mcu_audio_degraded_total` | Counter | `reason` | Silence or dropped input on the media path |
//! | `mcu_monitor_sweep_duration_seconds` | Histogram | none | Housekeeping sweep time |
//! | `mcu_monitor_checks_stalled_total` | Counter | none | Per-conference checks that timed out |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
