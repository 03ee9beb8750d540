//! Pre-configured test data for MCU bridge tests.
//!
//! Provides:
//! - Members of every kind with unique names
//! - A `ConferenceManager` builder with test-friendly timings
//! - Audio block generators and simple measurements

use mcu_bridge::audio::AudioFormat;
use mcu_bridge::external::{
    Collaborators, ConferenceObserver, ConferenceRecorder, FeatureAccessHandler, TemplateStore,
};
use mcu_bridge::manager::{ConferenceManager, ManagerConfig};
use mcu_bridge::member::{BridgeMember, RecorderMember, StreamMember};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 8 kHz mono.
pub const NARROWBAND: AudioFormat = AudioFormat::NARROWBAND_MONO;

/// 16 kHz stereo.
#[must_use]
pub fn wideband_stereo() -> AudioFormat {
    AudioFormat::new(16_000, 2).expect("16 kHz stereo is a valid format")
}

/// Frames in one 20 ms packet of `format`.
#[must_use]
pub fn packet_frames(format: AudioFormat) -> usize {
    usize::try_from(format.frames_for_ms(20)).expect("packet fits in usize")
}

// ============================================================================
// Members
// ============================================================================

/// A bridge member with a fresh call token.
#[must_use]
pub fn bridge_member(name: &str) -> Arc<BridgeMember> {
    Arc::new(BridgeMember::new(name, format!("call-{}", Uuid::new_v4())))
}

/// A bridge member with a random unique name.
#[must_use]
pub fn random_bridge_member() -> Arc<BridgeMember> {
    bridge_member(&format!("member-{}", Uuid::new_v4()))
}

#[must_use]
pub fn recorder_member(name: &str) -> Arc<RecorderMember> {
    Arc::new(RecorderMember::new(name))
}

#[must_use]
pub fn stream_member(name: &str) -> Arc<StreamMember> {
    Arc::new(StreamMember::new(name, format!("test://{name}")))
}

// ============================================================================
// Manager
// ============================================================================

/// Builder for a `ConferenceManager` with short monitor timings.
#[derive(Default)]
pub struct TestManager {
    config: TestManagerConfig,
    collaborators: Collaborators,
}

struct TestManagerConfig(ManagerConfig);

impl Default for TestManagerConfig {
    fn default() -> Self {
        Self(ManagerConfig {
            monitor_interval: Duration::from_millis(20),
            empty_conference_grace: Duration::from_secs(30),
            monitor_check_timeout: Duration::from_millis(100),
            ..ManagerConfig::default()
        })
    }
}

impl TestManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_conferences(mut self, max: usize) -> Self {
        self.config.0.max_conferences = max;
        self
    }

    #[must_use]
    pub fn with_max_members(mut self, max: usize) -> Self {
        self.config.0.max_members_per_conference = max;
        self
    }

    #[must_use]
    pub fn with_audio_buffer_ms(mut self, ms: u64) -> Self {
        self.config.0.audio_buffer_ms = ms;
        self
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.config.0.empty_conference_grace = grace;
        self
    }

    #[must_use]
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.0.monitor_check_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn ConferenceRecorder>) -> Self {
        self.collaborators = self.collaborators.with_recorder(recorder);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ConferenceObserver>) -> Self {
        self.collaborators = self.collaborators.with_observer(observer);
        self
    }

    #[must_use]
    pub fn with_feature_access(mut self, handler: Arc<dyn FeatureAccessHandler>) -> Self {
        self.collaborators = self.collaborators.with_feature_access(handler);
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.collaborators = self.collaborators.with_templates(templates);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config.0
    }

    #[must_use]
    pub fn build(self) -> Arc<ConferenceManager> {
        Arc::new(ConferenceManager::new(self.config.0, self.collaborators))
    }
}

// ============================================================================
// Audio
// ============================================================================

/// `frames` frames of `format` with every sample set to `value`.
#[must_use]
pub fn constant_block(format: AudioFormat, frames: usize, value: i16) -> Vec<i16> {
    vec![value; format.samples_in(frames)]
}

/// A sine tone starting at frame `start_frame`, duplicated across channels.
#[must_use]
pub fn sine(format: AudioFormat, frames: usize, hz: f64, amplitude: i16, start_frame: u64) -> Vec<i16> {
    let channels = usize::from(format.channels());
    let rate = f64::from(format.sample_rate());
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        #[allow(clippy::cast_precision_loss)]
        let t = (start_frame + i as u64) as f64 / rate;
        #[allow(clippy::cast_possible_truncation)]
        let sample = (f64::from(amplitude) * (2.0 * std::f64::consts::PI * hz * t).sin()) as i16;
        out.extend(std::iter::repeat(sample).take(channels));
    }
    out
}

/// Largest absolute sample value.
#[must_use]
pub fn peak(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}

#[must_use]
pub fn is_silent(samples: &[i16]) -> bool {
    samples.iter().all(|&s| s == 0)
}
