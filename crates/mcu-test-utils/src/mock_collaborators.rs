//! Mock collaborators that record every call.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcu_test_utils::MockRecorder;
//!
//! let recorder = MockRecorder::builder().without_space().build();
//! let manager = TestManager::new().with_recorder(recorder.clone()).build();
//! // start_recorder() now fails with RecorderSpaceExhausted
//! ```

use common::types::{ConferenceGuid, MemberId};
use mcu_bridge::external::{
    ConferenceIdentity, ConferenceObserver, ConferenceRecorder, FeatureAccessHandler,
    RecorderError, TemplateStore,
};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Recorder
// ============================================================================

/// Recorder with configurable space that counts every call.
#[derive(Debug)]
pub struct MockRecorder {
    has_space: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    ticks: Mutex<Vec<String>>,
}

impl MockRecorder {
    #[must_use]
    pub fn builder() -> MockRecorderBuilder {
        MockRecorderBuilder::default()
    }

    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn set_has_space(&self, has_space: bool) {
        self.has_space.store(has_space, Ordering::SeqCst);
    }

    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Rooms that received a monitor tick, in order.
    #[must_use]
    pub fn ticked_rooms(&self) -> Vec<String> {
        self.ticks.lock().clone()
    }
}

impl ConferenceRecorder for MockRecorder {
    fn has_space(&self, _conference: &ConferenceIdentity) -> bool {
        self.has_space.load(Ordering::SeqCst)
    }

    fn start(&self, conference: &ConferenceIdentity) -> Result<(), RecorderError> {
        if !self.has_space(conference) {
            return Err(RecorderError::SpaceExhausted);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, _conference: &ConferenceIdentity) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_monitor_tick(&self, conference: &ConferenceIdentity) {
        self.ticks.lock().push(conference.number.clone());
    }
}

/// Builder for [`MockRecorder`].
#[derive(Debug)]
pub struct MockRecorderBuilder {
    has_space: bool,
}

impl Default for MockRecorderBuilder {
    fn default() -> Self {
        Self { has_space: true }
    }
}

impl MockRecorderBuilder {
    #[must_use]
    pub fn without_space(mut self) -> Self {
        self.has_space = false;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockRecorder> {
        Arc::new(MockRecorder {
            has_space: AtomicBool::new(self.has_space),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            ticks: Mutex::new(Vec::new()),
        })
    }
}

/// Recorder whose monitor tick blocks until [`release`](Self::release).
///
/// Drives the monitor's stuck-check path. Always release before the test's
/// runtime shuts down: it waits for blocking-pool threads.
#[derive(Debug, Default)]
pub struct StallingRecorder {
    released: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
}

impl StallingRecorder {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release(&self) {
        *self.released.lock() = true;
        self.cv.notify_all();
    }

    /// Ticks that have started (including ones still blocked).
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl ConferenceRecorder for StallingRecorder {
    fn has_space(&self, _conference: &ConferenceIdentity) -> bool {
        true
    }

    fn start(&self, _conference: &ConferenceIdentity) -> Result<(), RecorderError> {
        Ok(())
    }

    fn stop(&self, _conference: &ConferenceIdentity) -> bool {
        true
    }

    fn on_monitor_tick(&self, _conference: &ConferenceIdentity) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut released = self.released.lock();
        while !*released {
            // Bounded so a forgotten release cannot hang the suite forever.
            if self
                .cv
                .wait_for(&mut released, Duration::from_secs(10))
                .timed_out()
            {
                break;
            }
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Observer that keeps every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    created: Mutex<Vec<ConferenceGuid>>,
    destroyed: Mutex<Vec<ConferenceGuid>>,
    levels: Mutex<Vec<(MemberId, u32)>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn created(&self) -> Vec<ConferenceGuid> {
        self.created.lock().clone()
    }

    #[must_use]
    pub fn destroyed(&self) -> Vec<ConferenceGuid> {
        self.destroyed.lock().clone()
    }

    #[must_use]
    pub fn levels_for(&self, member: MemberId) -> Vec<u32> {
        self.levels
            .lock()
            .iter()
            .filter(|(id, _)| *id == member)
            .map(|(_, level)| *level)
            .collect()
    }
}

impl ConferenceObserver for RecordingObserver {
    fn on_conference_created(&self, conference: &ConferenceIdentity) {
        self.created.lock().push(conference.guid);
    }

    fn on_conference_destroyed(&self, conference: &ConferenceIdentity) {
        self.destroyed.lock().push(conference.guid);
    }

    fn on_member_audio_level(&self, _conference: &ConferenceIdentity, member: MemberId, level: u32) {
        self.levels.lock().push((member, level));
    }
}

// ============================================================================
// Feature access
// ============================================================================

/// Recognizes a fixed set of codes and records every attempt.
#[derive(Debug, Default)]
pub struct MockFeatureAccess {
    known: Vec<String>,
    seen: Mutex<Vec<(MemberId, String)>>,
}

impl MockFeatureAccess {
    #[must_use]
    pub fn recognizing(codes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            known: codes.iter().map(ToString::to_string).collect(),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn seen(&self) -> Vec<(MemberId, String)> {
        self.seen.lock().clone()
    }
}

impl FeatureAccessHandler for MockFeatureAccess {
    fn handle(&self, _conference: &ConferenceIdentity, member: MemberId, code: &str) -> bool {
        self.seen.lock().push((member, code.to_string()));
        self.known.iter().any(|k| k == code)
    }
}

// ============================================================================
// Templates
// ============================================================================

/// In-memory template store keyed by (room, template name).
#[derive(Debug, Default)]
pub struct MockTemplateStore {
    templates: Mutex<HashMap<(String, String), String>>,
    loaded: Mutex<Vec<String>>,
}

impl MockTemplateStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Template names passed to `load`, in order.
    #[must_use]
    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }
}

impl TemplateStore for MockTemplateStore {
    fn save(&self, conference: &ConferenceIdentity, name: &str) -> bool {
        self.templates.lock().insert(
            (conference.number.clone(), name.to_string()),
            format!("template {name} for {}", conference.name),
        );
        true
    }

    fn load(&self, conference: &ConferenceIdentity, name: &str) -> bool {
        let found = self
            .templates
            .lock()
            .contains_key(&(conference.number.clone(), name.to_string()));
        if found {
            self.loaded.lock().push(name.to_string());
        }
        found
    }

    fn list(&self, conference: &ConferenceIdentity) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .lock()
            .keys()
            .filter(|(room, _)| *room == conference.number)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn extract(&self, conference: &ConferenceIdentity, name: &str) -> Option<String> {
        self.templates
            .lock()
            .get(&(conference.number.clone(), name.to_string()))
            .cloned()
    }

    fn rewrite(&self, conference: &ConferenceIdentity, name: &str, content: &str) -> bool {
        self.templates.lock().insert(
            (conference.number.clone(), name.to_string()),
            content.to_string(),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(number: &str) -> ConferenceIdentity {
        ConferenceIdentity {
            list_id: 1,
            guid: ConferenceGuid::new(),
            number: number.to_string(),
            name: "Test".to_string(),
        }
    }

    #[test]
    fn test_recorder_without_space_refuses_start() {
        let recorder = MockRecorder::builder().without_space().build();
        let id = identity("100");
        assert_eq!(recorder.start(&id), Err(RecorderError::SpaceExhausted));
        recorder.set_has_space(true);
        assert!(recorder.start(&id).is_ok());
        assert_eq!(recorder.starts(), 1);
    }

    #[test]
    fn test_template_store_scoped_by_room() {
        let store = MockTemplateStore::new();
        store.save(&identity("100"), "daily");
        assert_eq!(store.list(&identity("100")), vec!["daily"]);
        assert!(store.list(&identity("200")).is_empty());
        assert!(store.load(&identity("100"), "daily"));
        assert!(!store.load(&identity("200"), "daily"));
        assert_eq!(store.loaded(), vec!["daily"]);
    }

    #[test]
    fn test_feature_access_records_attempts() {
        let fac = MockFeatureAccess::recognizing(&["*6"]);
        let member = MemberId::new();
        assert!(fac.handle(&identity("1"), member, "*6"));
        assert!(!fac.handle(&identity("1"), member, "*9"));
        assert_eq!(fac.seen().len(), 2);
    }
}
