//! Interfaces to the subsystems the bridge calls into but does not implement.
//!
//! Video mixing, conference templates, recording, feature-access codes and
//! lifecycle notifications are all reached through the traits below. Every
//! collaborator is optional: a conference without one treats the
//! corresponding operation as "not handled".

use crate::member::ConferenceMember;
use common::types::{ConferenceGuid, MemberId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Stable handles of a conference, passed to collaborators instead of the
/// conference itself so they cannot reach into its membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceIdentity {
    pub list_id: u64,
    pub guid: ConferenceGuid,
    pub number: String,
    pub name: String,
}

/// One raw video frame. Pixel layout is the video mixer's business.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    #[must_use]
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

/// Video frame exchange and mixer-selection policy.
pub trait VideoMixer: Send + Sync {
    /// Fill `frame` with the video `member` should see. Returns `false` if
    /// nothing was produced.
    fn read_member_video(
        &self,
        conference: &ConferenceIdentity,
        member: MemberId,
        frame: &mut VideoFrame,
    ) -> bool;

    /// Accept one frame from `member`.
    fn write_member_video(
        &self,
        conference: &ConferenceIdentity,
        member: MemberId,
        frame: &VideoFrame,
    ) -> bool;

    fn freeze_video(&self, _conference: &ConferenceIdentity, _member: MemberId) -> bool {
        false
    }

    fn put_chosen_van(&self, _conference: &ConferenceIdentity) -> bool {
        false
    }

    fn use_same_video_for_all_members(&self, _conference: &ConferenceIdentity) -> bool {
        false
    }
}

/// Named conference configuration templates.
pub trait TemplateStore: Send + Sync {
    fn save(&self, conference: &ConferenceIdentity, name: &str) -> bool;
    fn load(&self, conference: &ConferenceIdentity, name: &str) -> bool;
    fn list(&self, conference: &ConferenceIdentity) -> Vec<String>;
    fn extract(&self, conference: &ConferenceIdentity, name: &str) -> Option<String>;
    fn rewrite(&self, conference: &ConferenceIdentity, name: &str, content: &str) -> bool;

    /// Apply per-member option overrides (gains, mute) from the active template.
    fn pull_member_options(&self, _conference: &ConferenceIdentity, _member: &dyn ConferenceMember) {}
}

/// Recorder failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("no recording space available")]
    SpaceExhausted,

    #[error("recorder failed: {0}")]
    Failed(String),
}

/// Call recording.
pub trait ConferenceRecorder: Send + Sync {
    fn has_space(&self, conference: &ConferenceIdentity) -> bool;

    /// Start recording.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if recording could not start.
    fn start(&self, conference: &ConferenceIdentity) -> Result<(), RecorderError>;

    fn stop(&self, conference: &ConferenceIdentity) -> bool;

    /// Called by the monitor once per sweep for each non-empty conference.
    /// Runs on the blocking pool; may block.
    fn on_monitor_tick(&self, _conference: &ConferenceIdentity) {}
}

/// Feature-access (DTMF-like) command handling.
pub trait FeatureAccessHandler: Send + Sync {
    /// Apply `code` on behalf of `member`. Returns `true` if it was recognized.
    fn handle(&self, conference: &ConferenceIdentity, member: MemberId, code: &str) -> bool;
}

/// Lifecycle and side-channel notifications.
pub trait ConferenceObserver: Send + Sync {
    fn on_conference_created(&self, _conference: &ConferenceIdentity) {}
    fn on_conference_destroyed(&self, _conference: &ConferenceIdentity) {}
    fn on_member_audio_level(&self, _conference: &ConferenceIdentity, _member: MemberId, _level: u32) {}
}

/// The set of collaborators a manager hands to each conference it creates.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub video: Option<Arc<dyn VideoMixer>>,
    pub templates: Option<Arc<dyn TemplateStore>>,
    pub recorder: Option<Arc<dyn ConferenceRecorder>>,
    pub feature_access: Option<Arc<dyn FeatureAccessHandler>>,
    pub observer: Option<Arc<dyn ConferenceObserver>>,
}

impl Collaborators {
    #[must_use]
    pub fn with_video(mut self, video: Arc<dyn VideoMixer>) -> Self {
        self.video = Some(video);
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.templates = Some(templates);
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn ConferenceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn with_feature_access(mut self, handler: Arc<dyn FeatureAccessHandler>) -> Self {
        self.feature_access = Some(handler);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ConferenceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("video", &self.video.is_some())
            .field("templates", &self.templates.is_some())
            .field("recorder", &self.recorder.is_some())
            .field("feature_access", &self.feature_access.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
