//! Conference: membership, per-listener mixing and collaborator delegation.
//!
//! # Locking
//!
//! One membership mutex guards the member, profile, audio-connection and
//! member-connection maps together. Lock order is membership, then a
//! listener's audio caches, then a single connection's ring; the read path
//! snapshots the connections it needs and drops the membership mutex before
//! touching any cache, so media reads never hold it while resampling.
//!
//! Collaborators are always called with the membership mutex released.

use crate::audio::{AudioConnection, AudioFormat};
use crate::errors::BridgeError;
use crate::external::{Collaborators, ConferenceIdentity, RecorderError, VideoFrame};
use crate::member::{ConferenceMember, MemberConnection, MemberCore};
use crate::observability::metrics;
use crate::profile::{normalize_name, ConferenceProfile};
use chrono::{DateTime, Utc};
use common::types::{ConferenceGuid, MemberId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

/// How long `try_occupancy` waits for the membership mutex.
const OCCUPANCY_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-conference limits handed down by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConferenceSettings {
    pub max_member_count: usize,
    /// Ring buffer window per member connection.
    pub audio_buffer_ms: u64,
}

impl Default for ConferenceSettings {
    fn default() -> Self {
        Self {
            max_member_count: 100,
            audio_buffer_ms: 1000,
        }
    }
}

struct Membership {
    members: HashMap<MemberId, Arc<dyn ConferenceMember>>,
    /// Keyed by profile id, so iteration is join order.
    profiles: BTreeMap<u64, ConferenceProfile>,
    profile_ids: HashMap<MemberId, u64>,
    connections: HashMap<MemberId, Arc<AudioConnection>>,
    member_connections: HashMap<MemberId, Arc<dyn MemberConnection>>,
    visible: HashSet<MemberId>,
    next_profile_id: u64,
    empty_since: Option<Instant>,
}

impl Membership {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            profiles: BTreeMap::new(),
            profile_ids: HashMap::new(),
            connections: HashMap::new(),
            member_connections: HashMap::new(),
            visible: HashSet::new(),
            next_profile_id: 1,
            empty_since: Some(Instant::now()),
        }
    }

    fn member_by_profile(&self, profile: &ConferenceProfile) -> Option<Arc<dyn ConferenceMember>> {
        self.members.get(&profile.member_id()).cloned()
    }
}

/// A live mixing session.
pub struct Conference {
    identity: ConferenceIdentity,
    start_time: DateTime<Utc>,
    settings: ConferenceSettings,
    stopping: AtomicBool,
    housekeeping: AtomicBool,
    collaborators: Collaborators,
    membership: Mutex<Membership>,
}

impl Conference {
    pub(crate) fn new(
        list_id: u64,
        guid: ConferenceGuid,
        number: impl Into<String>,
        name: impl Into<String>,
        settings: ConferenceSettings,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            identity: ConferenceIdentity {
                list_id,
                guid,
                number: number.into(),
                name: name.into(),
            },
            start_time: Utc::now(),
            settings,
            stopping: AtomicBool::new(false),
            housekeeping: AtomicBool::new(false),
            collaborators,
            membership: Mutex::new(Membership::new()),
        }
    }

    // ------------------------------------------------------------------
    // Identity and attributes
    // ------------------------------------------------------------------

    #[must_use]
    pub fn list_id(&self) -> u64 {
        self.identity.list_id
    }

    #[must_use]
    pub fn guid(&self) -> ConferenceGuid {
        self.identity.guid
    }

    /// Room number / name used to address the conference.
    #[must_use]
    pub fn number(&self) -> &str {
        &self.identity.number
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    #[must_use]
    pub fn identity(&self) -> &ConferenceIdentity {
        &self.identity
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn max_member_count(&self) -> usize {
        self.settings.max_member_count
    }

    /// Set once the conference has left the registry. A stopping conference
    /// refuses new members.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add `member`.
    ///
    /// # Errors
    ///
    /// Refused without side effects when the conference is stopping, the
    /// member is already present or closing, the conference is full, or
    /// another member has the same normalized name. A member still attached
    /// to a different conference is an [`BridgeError::InvariantViolation`].
    #[instrument(skip_all, fields(room = %self.identity.number, member_id = %member.id()))]
    pub fn add_member(self: &Arc<Self>, member: Arc<dyn ConferenceMember>) -> Result<(), BridgeError> {
        match self.insert_member(&member) {
            Ok(member_count) => {
                metrics::increment_members_active();
                info!(
                    target: "mcu.conference",
                    room = %self.identity.number,
                    member_id = %member.id(),
                    member_name = %member.name(),
                    kind = %member.kind(),
                    member_count,
                    "Member added"
                );
                self.pull_member_options(member.as_ref());
                Ok(())
            }
            Err(e) => {
                metrics::record_member_add_rejected(e.rejection_reason());
                warn!(
                    target: "mcu.conference",
                    room = %self.identity.number,
                    member_id = %member.id(),
                    member_name = %member.name(),
                    error = %e,
                    "Member add refused"
                );
                Err(e)
            }
        }
    }

    fn insert_member(self: &Arc<Self>, member: &Arc<dyn ConferenceMember>) -> Result<usize, BridgeError> {
        let id = member.id();
        let core = member.core();
        let mut m = self.membership.lock();

        if self.is_stopping() {
            return Err(BridgeError::ConferenceStopping(self.identity.number.clone()));
        }
        if m.members.contains_key(&id) {
            return Err(BridgeError::DuplicateMember(id.to_string()));
        }
        if core.lock().is_closing() {
            return Err(BridgeError::MemberClosing(member.name().to_string()));
        }
        if m.members.len() >= self.settings.max_member_count {
            return Err(BridgeError::ConferenceFull(self.identity.number.clone()));
        }
        let name_id = normalize_name(member.name());
        if m.profiles.values().any(|p| p.name_id() == name_id) {
            return Err(BridgeError::DuplicateMemberName(member.name().to_string()));
        }
        if !core.try_attach(self) {
            let other = core
                .conference()
                .map(|c| c.number().to_string())
                .unwrap_or_default();
            error!(
                target: "mcu.conference",
                room = %self.identity.number,
                other_room = %other,
                member_id = %id,
                "Member is already attached to another conference"
            );
            return Err(BridgeError::InvariantViolation(format!(
                "member {id} attached to {other} while joining {}",
                self.identity.number
            )));
        }

        let profile_id = m.next_profile_id;
        m.next_profile_id += 1;
        m.profiles
            .insert(profile_id, ConferenceProfile::new(profile_id, member));
        m.profile_ids.insert(id, profile_id);
        if member.kind().produces_audio() {
            m.connections.insert(
                id,
                Arc::new(AudioConnection::new(
                    id,
                    AudioFormat::NARROWBAND_MONO,
                    self.settings.audio_buffer_ms,
                )),
            );
        }
        m.member_connections.insert(id, member.create_connection());
        if member.is_visible() {
            m.visible.insert(id);
        }
        m.members.insert(id, Arc::clone(member));
        m.empty_since = None;
        core.mark_joined();

        Ok(m.members.len())
    }

    /// Remove a member and release its audio connection.
    ///
    /// Returns whether the conference is now empty.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemberNotFound`] if the member is not present.
    #[instrument(skip_all, fields(room = %self.identity.number, member_id = %member_id))]
    pub fn remove_member(&self, member_id: MemberId) -> Result<bool, BridgeError> {
        let (member, remaining) = {
            let mut m = self.membership.lock();
            let Some(member) = m.members.remove(&member_id) else {
                return Err(BridgeError::MemberNotFound(member_id.to_string()));
            };
            if let Some(profile_id) = m.profile_ids.remove(&member_id) {
                m.profiles.remove(&profile_id);
            }
            m.connections.remove(&member_id);
            m.member_connections.remove(&member_id);
            m.visible.remove(&member_id);
            if m.members.is_empty() {
                m.empty_since = Some(Instant::now());
            }
            // Unbind before the mutex drops so a concurrent re-add sees a
            // consistent member.
            let core = member.core();
            core.detach(self);
            core.clear_joined();
            (member, m.members.len())
        };

        member.core().caches().clear();
        metrics::decrement_members_active();

        info!(
            target: "mcu.conference",
            room = %self.identity.number,
            member_id = %member_id,
            member_name = %member.name(),
            member_count = remaining,
            "Member removed"
        );
        Ok(remaining == 0)
    }

    /// Change a member's public visibility, keeping the visible count in step.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemberNotFound`] if the member is not present.
    pub fn set_member_visible(&self, member_id: MemberId, visible: bool) -> Result<(), BridgeError> {
        let mut m = self.membership.lock();
        let Some(member) = m.members.get(&member_id).cloned() else {
            return Err(BridgeError::MemberNotFound(member_id.to_string()));
        };
        member.core().set_visible(visible);
        if visible {
            m.visible.insert(member_id);
        } else {
            m.visible.remove(&member_id);
        }
        Ok(())
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.membership.lock().members.len()
    }

    #[must_use]
    pub fn visible_member_count(&self) -> usize {
        self.membership.lock().visible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.membership.lock().members.is_empty()
    }

    /// When the conference last became empty, if it is empty now.
    #[must_use]
    pub fn empty_since(&self) -> Option<Instant> {
        self.membership.lock().empty_since
    }

    #[must_use]
    pub fn has_member(&self, member_id: MemberId) -> bool {
        self.membership.lock().members.contains_key(&member_id)
    }

    /// Members in join order.
    #[must_use]
    pub fn member_list(&self) -> Vec<Arc<dyn ConferenceMember>> {
        let m = self.membership.lock();
        m.profiles
            .values()
            .filter_map(|p| m.member_by_profile(p))
            .collect()
    }

    /// Profiles in join order.
    #[must_use]
    pub fn profile_list(&self) -> Vec<ConferenceProfile> {
        self.membership.lock().profiles.values().cloned().collect()
    }

    /// Profile whose normalized name matches `name`.
    #[must_use]
    pub fn find_profile(&self, name: &str) -> Option<ConferenceProfile> {
        let name_id = normalize_name(name);
        self.membership
            .lock()
            .profiles
            .values()
            .find(|p| p.name_id() == name_id)
            .cloned()
    }

    /// Member by display name (compared after normalization).
    #[must_use]
    pub fn find_member(&self, name: &str) -> Option<Arc<dyn ConferenceMember>> {
        self.find_member_by_name_id(&normalize_name(name))
    }

    /// Member by already-normalized name token.
    #[must_use]
    pub fn find_member_by_name_id(&self, name_id: &str) -> Option<Arc<dyn ConferenceMember>> {
        let m = self.membership.lock();
        m.profiles
            .values()
            .find(|p| p.name_id() == name_id)
            .and_then(|p| m.member_by_profile(p))
    }

    #[must_use]
    pub fn find_member_by_profile_id(&self, profile_id: u64) -> Option<Arc<dyn ConferenceMember>> {
        let m = self.membership.lock();
        m.profiles
            .get(&profile_id)
            .and_then(|p| m.member_by_profile(p))
    }

    #[must_use]
    pub fn find_member_by_id(&self, member_id: MemberId) -> Option<Arc<dyn ConferenceMember>> {
        self.membership.lock().members.get(&member_id).cloned()
    }

    // ------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------

    /// Mix every other member's audio for `listener` into `out`.
    ///
    /// `out` is overwritten. Returns how many sources contributed audio.
    pub fn read_member_audio(&self, listener: &MemberCore, out: &mut [i16], format: AudioFormat) -> usize {
        out.fill(0);
        let listener_id = listener.id();
        let sources: Vec<Arc<AudioConnection>> = {
            let m = self.membership.lock();
            if !m.members.contains_key(&listener_id) {
                return 0;
            }
            m.connections
                .iter()
                .filter(|(id, _)| **id != listener_id)
                .map(|(_, c)| Arc::clone(c))
                .collect()
        };

        let mut caches = listener.caches();
        let pruned = caches.retain_sources(|id| sources.iter().any(|c| c.member_id() == *id));
        if pruned > 0 {
            trace!(
                target: "mcu.audio",
                listener = %listener_id,
                pruned,
                "Dropped readers for departed sources"
            );
        }

        caches.mix_sources(&sources, out, format)
    }

    /// Buffer `samples` from `member` in the format they were produced in.
    ///
    /// A format change replaces the member's connection; listeners restart
    /// on the new one. Returns `false` if the member has no connection here
    /// (not present, or a kind that never speaks).
    pub fn write_member_audio(&self, member: &MemberCore, samples: &[i16], format: AudioFormat) -> bool {
        if !member.kind().produces_audio() {
            return false;
        }
        let member_id = member.id();
        let connection = {
            let mut m = self.membership.lock();
            match m.connections.get(&member_id) {
                Some(existing) if existing.format() == format => Arc::clone(existing),
                Some(existing) => {
                    debug!(
                        target: "mcu.audio",
                        room = %self.identity.number,
                        member_id = %member_id,
                        from_rate = existing.format().sample_rate(),
                        from_channels = existing.format().channels(),
                        to_rate = format.sample_rate(),
                        to_channels = format.channels(),
                        "Member audio format changed, replacing connection"
                    );
                    let replacement = Arc::new(AudioConnection::new(
                        member_id,
                        format,
                        self.settings.audio_buffer_ms,
                    ));
                    m.connections.insert(member_id, Arc::clone(&replacement));
                    replacement
                }
                None => return false,
            }
        };

        if samples.len() % usize::from(format.channels()) != 0 {
            metrics::record_audio_degraded("format");
        }
        connection.write(samples);
        true
    }

    /// Side-channel notification of a member's audio level.
    pub fn write_member_audio_level(&self, member: &MemberCore, level: u32) {
        trace!(
            target: "mcu.audio",
            room = %self.identity.number,
            member_id = %member.id(),
            level,
            "Member audio level"
        );
        if let Some(observer) = &self.collaborators.observer {
            observer.on_member_audio_level(&self.identity, member.id(), level);
        }
    }

    // ------------------------------------------------------------------
    // User input and feature access
    // ------------------------------------------------------------------

    /// Deliver a user-input indication to one member's endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemberNotFound`] if the member is not present.
    pub fn send_user_input(&self, target: MemberId, input: &str) -> Result<(), BridgeError> {
        let connection = self
            .membership
            .lock()
            .member_connections
            .get(&target)
            .cloned()
            .ok_or_else(|| BridgeError::MemberNotFound(target.to_string()))?;
        connection.send_user_input(input);
        Ok(())
    }

    /// Pass a feature-access code from `member` to the handler. Returns
    /// whether it was recognized.
    pub fn handle_feature_access_code(&self, member: MemberId, code: &str) -> bool {
        let Some(handler) = &self.collaborators.feature_access else {
            return false;
        };
        let handled = handler.handle(&self.identity, member, code);
        debug!(
            target: "mcu.conference",
            room = %self.identity.number,
            member_id = %member,
            handled,
            "Feature access code"
        );
        handled
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    #[must_use]
    pub fn recorder_has_space(&self) -> bool {
        self.collaborators
            .recorder
            .as_ref()
            .is_some_and(|r| r.has_space(&self.identity))
    }

    /// Start recording. `Ok(false)` means no recorder is configured.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RecorderSpaceExhausted`] when the recorder has
    /// no space, or [`BridgeError::Internal`] if it failed to start. The
    /// conference itself is unaffected either way.
    pub fn start_recorder(&self) -> Result<bool, BridgeError> {
        let Some(recorder) = &self.collaborators.recorder else {
            return Ok(false);
        };
        if !recorder.has_space(&self.identity) {
            warn!(target: "mcu.conference", room = %self.identity.number, "Recording refused: no space");
            return Err(BridgeError::RecorderSpaceExhausted);
        }
        match recorder.start(&self.identity) {
            Ok(()) => {
                info!(target: "mcu.conference", room = %self.identity.number, "Recording started");
                Ok(true)
            }
            Err(RecorderError::SpaceExhausted) => {
                warn!(target: "mcu.conference", room = %self.identity.number, "Recording refused: no space");
                Err(BridgeError::RecorderSpaceExhausted)
            }
            Err(RecorderError::Failed(reason)) => {
                warn!(target: "mcu.conference", room = %self.identity.number, %reason, "Recording failed to start");
                Err(BridgeError::Internal(reason))
            }
        }
    }

    pub fn stop_recorder(&self) -> bool {
        self.collaborators
            .recorder
            .as_ref()
            .is_some_and(|r| r.stop(&self.identity))
    }

    pub(crate) fn recorder_tick(&self) {
        if let Some(recorder) = &self.collaborators.recorder {
            recorder.on_monitor_tick(&self.identity);
        }
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub fn save_template(&self, name: &str) -> bool {
        self.collaborators
            .templates
            .as_ref()
            .is_some_and(|t| t.save(&self.identity, name))
    }

    pub fn load_template(&self, name: &str) -> bool {
        self.collaborators
            .templates
            .as_ref()
            .is_some_and(|t| t.load(&self.identity, name))
    }

    #[must_use]
    pub fn template_names(&self) -> Vec<String> {
        self.collaborators
            .templates
            .as_ref()
            .map(|t| t.list(&self.identity))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn extract_template(&self, name: &str) -> Option<String> {
        self.collaborators
            .templates
            .as_ref()
            .and_then(|t| t.extract(&self.identity, name))
    }

    pub fn rewrite_template(&self, name: &str, content: &str) -> bool {
        self.collaborators
            .templates
            .as_ref()
            .is_some_and(|t| t.rewrite(&self.identity, name, content))
    }

    /// Apply template overrides to `member`.
    pub fn pull_member_options(&self, member: &dyn ConferenceMember) {
        if let Some(templates) = &self.collaborators.templates {
            templates.pull_member_options(&self.identity, member);
        }
    }

    // ------------------------------------------------------------------
    // Video
    // ------------------------------------------------------------------

    pub fn write_member_video(&self, member: &MemberCore, frame: &VideoFrame) -> bool {
        self.collaborators
            .video
            .as_ref()
            .is_some_and(|v| v.write_member_video(&self.identity, member.id(), frame))
    }

    pub fn read_member_video(&self, member: &MemberCore, frame: &mut VideoFrame) -> bool {
        self.collaborators
            .video
            .as_ref()
            .is_some_and(|v| v.read_member_video(&self.identity, member.id(), frame))
    }

    pub fn freeze_video(&self, member: MemberId) -> bool {
        self.collaborators
            .video
            .as_ref()
            .is_some_and(|v| v.freeze_video(&self.identity, member))
    }

    pub fn put_chosen_van(&self) -> bool {
        self.collaborators
            .video
            .as_ref()
            .is_some_and(|v| v.put_chosen_van(&self.identity))
    }

    pub fn use_same_video_for_all_members(&self) -> bool {
        self.collaborators
            .video
            .as_ref()
            .is_some_and(|v| v.use_same_video_for_all_members(&self.identity))
    }

    // ------------------------------------------------------------------
    // Lifecycle (manager and monitor)
    // ------------------------------------------------------------------

    /// Flag the conference as stopping. Returns `false` if it already was.
    pub(crate) fn mark_stopping(&self) -> bool {
        let _m = self.membership.lock();
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    /// Flag the conference as stopping only if it has no members. Checked
    /// under the membership mutex, so no add can slip in between.
    pub(crate) fn stop_if_empty(&self) -> bool {
        let m = self.membership.lock();
        if !m.members.is_empty() {
            return false;
        }
        self.stopping.store(true, Ordering::Release);
        true
    }

    /// Claim the housekeeping slot. Fails while a previous check still runs.
    pub(crate) fn begin_housekeeping(&self) -> bool {
        self.housekeeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_housekeeping(&self) {
        self.housekeeping.store(false, Ordering::Release);
    }

    /// Member count and empty-since, without waiting indefinitely for the
    /// membership mutex.
    pub(crate) fn try_occupancy(&self) -> Option<(usize, Option<Instant>)> {
        self.membership
            .try_lock_for(OCCUPANCY_LOCK_TIMEOUT)
            .map(|m| (m.members.len(), m.empty_since))
    }
}

impl fmt::Debug for Conference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conference")
            .field("list_id", &self.identity.list_id)
            .field("guid", &self.identity.guid)
            .field("number", &self.identity.number)
            .field("name", &self.identity.name)
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::external::{ConferenceObserver, ConferenceRecorder, FeatureAccessHandler};
    use crate::member::{BridgeMember, RecorderMember, StreamMember};

    fn conference(max_member_count: usize) -> Arc<Conference> {
        conference_with(max_member_count, Collaborators::default())
    }

    fn conference_with(max_member_count: usize, collaborators: Collaborators) -> Arc<Conference> {
        Arc::new(Conference::new(
            1,
            ConferenceGuid::new(),
            "100",
            "Room 100",
            ConferenceSettings {
                max_member_count,
                audio_buffer_ms: 1000,
            },
            collaborators,
        ))
    }

    fn bridge(name: &str) -> Arc<BridgeMember> {
        Arc::new(BridgeMember::new(name, format!("call-{name}")))
    }

    #[test]
    fn test_add_and_remove_maintain_counts() {
        let conf = conference(10);
        let alice = bridge("Alice");
        let rec: Arc<dyn ConferenceMember> = Arc::new(RecorderMember::new("rec"));

        conf.add_member(alice.clone()).unwrap();
        conf.add_member(Arc::clone(&rec)).unwrap();
        assert_eq!(conf.member_count(), 2);
        assert_eq!(conf.visible_member_count(), 1, "recorder is concealed");
        assert!(alice.core().is_joined());
        assert!(conf.empty_since().is_none());

        assert!(!conf.remove_member(rec.id()).unwrap());
        assert!(conf.remove_member(alice.id()).unwrap(), "last member leaves");
        assert_eq!(conf.member_count(), 0);
        assert_eq!(conf.visible_member_count(), 0);
        assert!(!alice.core().is_joined());
        assert!(alice.core().conference().is_none());
        assert!(conf.empty_since().is_some());
    }

    #[test]
    fn test_duplicate_normalized_name_rejected() {
        let conf = conference(10);
        conf.add_member(bridge("Alice")).unwrap();

        let err = conf.add_member(bridge("  alice ")).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateMemberName(_)));
        assert_eq!(conf.member_count(), 1);
    }

    #[test]
    fn test_same_member_twice_rejected() {
        let conf = conference(10);
        let alice = bridge("Alice");
        conf.add_member(alice.clone()).unwrap();
        assert!(matches!(
            conf.add_member(alice).unwrap_err(),
            BridgeError::DuplicateMember(_)
        ));
    }

    #[test]
    fn test_capacity_rejected_without_side_effects() {
        let conf = conference(1);
        conf.add_member(bridge("Alice")).unwrap();
        let bob = bridge("Bob");
        assert!(matches!(
            conf.add_member(bob.clone()).unwrap_err(),
            BridgeError::ConferenceFull(_)
        ));
        assert!(bob.core().conference().is_none());
        assert!(!bob.core().is_joined());
        assert!(conf.find_member("Bob").is_none());
    }

    #[test]
    fn test_closing_member_rejected() {
        let conf = conference(10);
        let alice = bridge("Alice");
        alice.close();
        assert!(matches!(
            conf.add_member(alice).unwrap_err(),
            BridgeError::MemberClosing(_)
        ));
    }

    #[test]
    fn test_stopping_conference_refuses_members() {
        let conf = conference(10);
        assert!(conf.mark_stopping());
        assert!(!conf.mark_stopping());
        assert!(matches!(
            conf.add_member(bridge("Alice")).unwrap_err(),
            BridgeError::ConferenceStopping(_)
        ));
    }

    #[test]
    fn test_member_in_two_conferences_is_invariant_violation() {
        let first = conference(10);
        let second = conference(10);
        let alice = bridge("Alice");
        first.add_member(alice.clone()).unwrap();
        assert!(matches!(
            second.add_member(alice.clone()).unwrap_err(),
            BridgeError::InvariantViolation(_)
        ));
        assert!(Arc::ptr_eq(&alice.core().conference().unwrap(), &first));
    }

    #[test]
    fn test_remove_unknown_member() {
        let conf = conference(10);
        assert!(matches!(
            conf.remove_member(MemberId::new()).unwrap_err(),
            BridgeError::MemberNotFound(_)
        ));
    }

    #[test]
    fn test_visibility_changes_update_count() {
        let conf = conference(10);
        let alice = bridge("Alice");
        conf.add_member(alice.clone()).unwrap();
        assert_eq!(conf.visible_member_count(), 1);

        conf.set_member_visible(alice.id(), false).unwrap();
        assert_eq!(conf.visible_member_count(), 0);
        assert!(!alice.is_visible());

        conf.set_member_visible(alice.id(), true).unwrap();
        conf.set_member_visible(alice.id(), true).unwrap();
        assert_eq!(conf.visible_member_count(), 1);
    }

    #[test]
    fn test_lookups_resolve_same_member() {
        let conf = conference(10);
        let alice = bridge("Alice Smith");
        conf.add_member(bridge("Bob")).unwrap();
        conf.add_member(alice.clone()).unwrap();

        let profile = conf.find_profile("alice   smith").unwrap();
        assert_eq!(profile.id(), 2);
        assert_eq!(profile.member_id(), alice.id());

        let by_name = conf.find_member("ALICE SMITH").unwrap();
        let by_name_id = conf.find_member_by_name_id("alice smith").unwrap();
        let by_profile = conf.find_member_by_profile_id(profile.id()).unwrap();
        assert_eq!(by_name.id(), alice.id());
        assert_eq!(by_name_id.id(), alice.id());
        assert_eq!(by_profile.id(), alice.id());

        let names: Vec<String> = conf.member_list().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["Bob", "Alice Smith"]);
    }

    #[test]
    fn test_no_self_echo() {
        let conf = conference(10);
        let alice = bridge("Alice");
        let bob = bridge("Bob");
        conf.add_member(alice.clone()).unwrap();
        conf.add_member(bob.clone()).unwrap();

        let fmt = AudioFormat::NARROWBAND_MONO;
        assert!(alice.write_audio(&[3000; 160], fmt));

        let mut heard_by_alice = vec![0i16; 160];
        assert!(alice.read_audio(&mut heard_by_alice, fmt));
        assert!(heard_by_alice.iter().all(|&s| s == 0));

        let mut heard_by_bob = vec![0i16; 160];
        assert!(bob.read_audio(&mut heard_by_bob, fmt));
        assert!(heard_by_bob.iter().all(|&s| s == 3000));
    }

    #[test]
    fn test_sinks_do_not_contribute() {
        let conf = conference(10);
        let rec = Arc::new(RecorderMember::new("rec"));
        let stream = Arc::new(StreamMember::new("radio", "rtsp://radio"));
        let bob = bridge("Bob");
        conf.add_member(rec.clone()).unwrap();
        conf.add_member(stream.clone()).unwrap();
        conf.add_member(bob.clone()).unwrap();

        let fmt = AudioFormat::NARROWBAND_MONO;
        assert!(!conf.write_member_audio(rec.core(), &[9000; 160], fmt));
        assert!(stream.write_audio(&[500; 160], fmt));

        let mut out = vec![0i16; 160];
        assert_eq!(conf.read_member_audio(bob.core(), &mut out, fmt), 1);
        assert!(out.iter().all(|&s| s == 500));

        // The recorder still hears the stream.
        let mut captured = vec![0i16; 160];
        assert!(rec.read_audio(&mut captured, fmt));
        assert!(captured.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_mute_and_gain() {
        let conf = conference(10);
        let alice = bridge("Alice");
        let bob = bridge("Bob");
        conf.add_member(alice.clone()).unwrap();
        conf.add_member(bob.clone()).unwrap();
        let fmt = AudioFormat::NARROWBAND_MONO;

        alice.core().stats().set_input_gain(2.0);
        assert!(alice.write_audio(&[1000; 160], fmt));
        bob.core().stats().set_output_gain(0.5);
        let mut out = vec![0i16; 160];
        bob.read_audio(&mut out, fmt);
        assert!(out.iter().all(|&s| s == 1000));

        alice.core().stats().set_mute_mask(crate::member::MUTE_INCOMING_AUDIO);
        assert!(!alice.write_audio(&[1000; 160], fmt));

        bob.core().stats().set_mute_mask(crate::member::MUTE_OUTGOING_AUDIO);
        alice.core().stats().set_mute_mask(0);
        alice.write_audio(&[1000; 160], fmt);
        bob.read_audio(&mut out, fmt);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_user_input_routed_to_target() {
        let conf = conference(10);
        let alice = bridge("Alice");
        conf.add_member(alice.clone()).unwrap();
        conf.send_user_input(alice.id(), "5").unwrap();
        assert_eq!(alice.received_user_input(), vec!["5"]);
        assert!(conf.send_user_input(MemberId::new(), "5").is_err());
    }

    struct NoSpace;
    impl ConferenceRecorder for NoSpace {
        fn has_space(&self, _: &ConferenceIdentity) -> bool {
            false
        }
        fn start(&self, _: &ConferenceIdentity) -> Result<(), RecorderError> {
            Ok(())
        }
        fn stop(&self, _: &ConferenceIdentity) -> bool {
            true
        }
    }

    #[test]
    fn test_recorder_space_exhaustion_is_non_fatal() {
        let conf = conference_with(10, Collaborators::default().with_recorder(Arc::new(NoSpace)));
        conf.add_member(bridge("Alice")).unwrap();
        assert!(matches!(
            conf.start_recorder().unwrap_err(),
            BridgeError::RecorderSpaceExhausted
        ));
        assert_eq!(conf.member_count(), 1);
        assert!(!conf.is_stopping());
    }

    #[test]
    fn test_absent_collaborators_are_not_handled() {
        let conf = conference(10);
        assert!(!conf.start_recorder().unwrap());
        assert!(!conf.recorder_has_space());
        assert!(!conf.save_template("t"));
        assert!(conf.template_names().is_empty());
        assert!(!conf.handle_feature_access_code(MemberId::new(), "*6"));
        assert!(!conf.put_chosen_van());
    }

    struct LevelLog(Mutex<Vec<u32>>);
    impl ConferenceObserver for LevelLog {
        fn on_member_audio_level(&self, _: &ConferenceIdentity, _: MemberId, level: u32) {
            self.0.lock().push(level);
        }
    }

    #[test]
    fn test_audio_level_reported_on_change() {
        let log = Arc::new(LevelLog(Mutex::new(Vec::new())));
        let conf = conference_with(10, Collaborators::default().with_observer(log.clone()));
        let alice = bridge("Alice");
        conf.add_member(alice.clone()).unwrap();
        let fmt = AudioFormat::NARROWBAND_MONO;

        alice.write_audio(&[2000; 160], fmt);
        alice.write_audio(&[2010; 160], fmt);
        alice.write_audio(&[0; 160], fmt);
        assert_eq!(*log.0.lock(), vec![2000, 0]);
    }

    struct MuteCode;
    impl FeatureAccessHandler for MuteCode {
        fn handle(&self, _: &ConferenceIdentity, _: MemberId, code: &str) -> bool {
            code == "*6"
        }
    }

    #[test]
    fn test_feature_access_delegated() {
        let conf =
            conference_with(10, Collaborators::default().with_feature_access(Arc::new(MuteCode)));
        assert!(conf.handle_feature_access_code(MemberId::new(), "*6"));
        assert!(!conf.handle_feature_access_code(MemberId::new(), "*9"));
    }

    #[test]
    fn test_stop_if_empty() {
        let conf = conference(10);
        let alice = bridge("Alice");
        conf.add_member(alice.clone()).unwrap();
        assert!(!conf.stop_if_empty());
        conf.remove_member(alice.id()).unwrap();
        assert!(conf.stop_if_empty());
        assert!(conf.is_stopping());
    }

    #[test]
    fn test_concurrent_remove_and_readd_keep_member_bound() {
        use std::sync::Barrier;

        let conf = conference(10);
        let alice = bridge("Alice");

        for _ in 0..500 {
            conf.add_member(alice.clone()).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let remover = {
                let conf = Arc::clone(&conf);
                let barrier = Arc::clone(&barrier);
                let id = alice.id();
                std::thread::spawn(move || {
                    barrier.wait();
                    conf.remove_member(id).unwrap();
                })
            };
            let adder = {
                let conf = Arc::clone(&conf);
                let barrier = Arc::clone(&barrier);
                let alice = alice.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let _ = conf.add_member(alice);
                })
            };
            remover.join().unwrap();
            adder.join().unwrap();

            let present = conf.has_member(alice.id());
            assert_eq!(alice.core().conference().is_some(), present);
            assert_eq!(alice.core().is_joined(), present);
            if present {
                conf.remove_member(alice.id()).unwrap();
            }
        }
        assert_eq!(conf.member_count(), 0);
    }

    #[test]
    fn test_housekeeping_slot_is_exclusive() {
        let conf = conference(10);
        assert!(conf.begin_housekeeping());
        assert!(!conf.begin_housekeeping());
        conf.end_housekeeping();
        assert!(conf.begin_housekeeping());
    }
}
