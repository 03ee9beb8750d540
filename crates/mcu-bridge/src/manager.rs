//! `ConferenceManager` - registry of every live conference.
//!
//! The registry is one authoritative map keyed by the numeric list id, with
//! the globally-unique id and the room number as secondary indices into it.
//! All three are mutated together under a single registry mutex, so at no
//! point can two live conferences share any of the three handles.
//!
//! Lookups return `Arc<Conference>`: the conference stays valid for as long
//! as the caller holds it, even if it leaves the registry meanwhile (it is
//! then flagged stopping and refuses new members).
//!
//! Lock order: registry, then a conference's membership mutex.

use crate::conference::{Conference, ConferenceSettings};
use crate::errors::BridgeError;
use crate::external::{Collaborators, ConferenceIdentity};
use crate::member::ConferenceMember;
use crate::monitor::ConferenceMonitor;
use crate::observability::metrics;
use crate::profile::ConferenceProfile;
use common::types::ConferenceGuid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Library-facing manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Conferences beyond this count are refused.
    pub max_conferences: usize,
    pub max_members_per_conference: usize,
    /// Per-member ring buffer window.
    pub audio_buffer_ms: u64,
    pub monitor_interval: Duration,
    /// How long a conference may sit empty before the monitor reaps it.
    pub empty_conference_grace: Duration,
    /// Upper bound on one conference's housekeeping check.
    pub monitor_check_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_conferences: 100,
            max_members_per_conference: 100,
            audio_buffer_ms: 1000,
            monitor_interval: Duration::from_secs(1),
            empty_conference_grace: Duration::from_secs(30),
            monitor_check_timeout: Duration::from_secs(2),
        }
    }
}

/// Why a conference left the registry. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Explicit,
    Idle,
    Shutdown,
}

impl RemovalReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RemovalReason::Explicit => "explicit",
            RemovalReason::Idle => "idle",
            RemovalReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<u64, Arc<Conference>>,
    by_guid: HashMap<ConferenceGuid, u64>,
    by_room: HashMap<String, u64>,
    next_id: u64,
}

impl Registry {
    fn get_by_room(&self, number: &str) -> Option<&Arc<Conference>> {
        self.by_room.get(number).and_then(|id| self.by_id.get(id))
    }

    /// Drop a conference from all three indices.
    fn detach(&mut self, number: &str) -> Option<Arc<Conference>> {
        let id = self.by_room.remove(number)?;
        let conference = self.by_id.remove(&id)?;
        self.by_guid.remove(&conference.guid());
        Some(conference)
    }
}

/// Registry of live conferences.
pub struct ConferenceManager {
    config: ManagerConfig,
    collaborators: Collaborators,
    registry: Mutex<Registry>,
}

impl ConferenceManager {
    #[must_use]
    pub fn new(config: ManagerConfig, collaborators: Collaborators) -> Self {
        info!(
            target: "mcu.manager",
            max_conferences = config.max_conferences,
            max_members_per_conference = config.max_members_per_conference,
            audio_buffer_ms = config.audio_buffer_ms,
            "Conference manager created"
        );
        Self {
            config,
            collaborators,
            registry: Mutex::new(Registry::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn max_conference_count(&self) -> usize {
        self.config.max_conferences
    }

    #[must_use]
    pub fn conference_count(&self) -> usize {
        self.registry.lock().by_id.len()
    }

    /// Get the conference for room `number`, creating it if absent.
    ///
    /// Check and insert happen under one registry lock: concurrent callers
    /// for the same room all get the same conference.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BridgeFull`] if a new conference would exceed
    /// the configured maximum.
    #[instrument(skip_all, fields(room = %number))]
    pub fn make_conference(&self, number: &str, name: &str) -> Result<Arc<Conference>, BridgeError> {
        let (conference, count) = {
            let mut registry = self.registry.lock();
            if let Some(existing) = registry.get_by_room(number) {
                debug!(
                    target: "mcu.manager",
                    room = %number,
                    conference_id = existing.list_id(),
                    "Conference already exists, reusing"
                );
                return Ok(Arc::clone(existing));
            }

            if registry.by_id.len() >= self.config.max_conferences {
                warn!(
                    target: "mcu.manager",
                    room = %number,
                    max_conferences = self.config.max_conferences,
                    "Refusing conference: bridge at capacity"
                );
                return Err(BridgeError::BridgeFull);
            }

            registry.next_id += 1;
            let list_id = registry.next_id;
            let mut guid = ConferenceGuid::new();
            while registry.by_guid.contains_key(&guid) {
                guid = ConferenceGuid::new();
            }

            let conference = Arc::new(Conference::new(
                list_id,
                guid,
                number,
                name,
                ConferenceSettings {
                    max_member_count: self.config.max_members_per_conference,
                    audio_buffer_ms: self.config.audio_buffer_ms,
                },
                self.collaborators.clone(),
            ));
            registry.by_id.insert(list_id, Arc::clone(&conference));
            registry.by_guid.insert(guid, list_id);
            registry.by_room.insert(number.to_string(), list_id);
            (conference, registry.by_id.len())
        };

        metrics::record_conference_created();
        metrics::set_conferences_active(count);
        info!(
            target: "mcu.manager",
            room = %number,
            conference_id = conference.list_id(),
            guid = %conference.guid(),
            total_conferences = count,
            "Conference created"
        );
        if let Some(observer) = &self.collaborators.observer {
            observer.on_conference_created(conference.identity());
        }
        Ok(conference)
    }

    #[must_use]
    pub fn find_conference_by_id(&self, list_id: u64) -> Option<Arc<Conference>> {
        self.registry.lock().by_id.get(&list_id).cloned()
    }

    #[must_use]
    pub fn find_conference_by_guid(&self, guid: &ConferenceGuid) -> Option<Arc<Conference>> {
        let registry = self.registry.lock();
        registry
            .by_guid
            .get(guid)
            .and_then(|id| registry.by_id.get(id))
            .cloned()
    }

    #[must_use]
    pub fn find_conference_by_room(&self, number: &str) -> Option<Arc<Conference>> {
        self.registry.lock().get_by_room(number).cloned()
    }

    /// Room number of the conference with `guid`, if live.
    #[must_use]
    pub fn has_conference_guid(&self, guid: &ConferenceGuid) -> Option<String> {
        self.find_conference_by_guid(guid)
            .map(|c| c.number().to_string())
    }

    /// GUID of the conference in room `number`, if live.
    #[must_use]
    pub fn has_conference_room(&self, number: &str) -> Option<ConferenceGuid> {
        self.registry.lock().get_by_room(number).map(|c| c.guid())
    }

    /// Snapshot of live conferences ordered by list id.
    #[must_use]
    pub fn conference_list(&self) -> Vec<Arc<Conference>> {
        let mut list: Vec<Arc<Conference>> = self.registry.lock().by_id.values().cloned().collect();
        list.sort_by_key(|c| c.list_id());
        list
    }

    /// Remove the conference in room `number` from the registry.
    ///
    /// The conference is flagged stopping. Members still attached keep their
    /// media path until their own removal; callers should not remove an
    /// occupied conference.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConferenceNotFound`] if no such room is live.
    #[instrument(skip_all, fields(room = %number))]
    pub fn remove_conference(&self, number: &str) -> Result<Arc<Conference>, BridgeError> {
        let (conference, count) = {
            let mut registry = self.registry.lock();
            let conference = registry
                .detach(number)
                .ok_or_else(|| BridgeError::ConferenceNotFound(number.to_string()))?;
            conference.mark_stopping();
            (conference, registry.by_id.len())
        };

        let remaining_members = conference.member_count();
        if remaining_members > 0 {
            warn!(
                target: "mcu.manager",
                room = %number,
                remaining_members,
                "Removed conference still has members"
            );
        }
        self.on_removed(&conference, RemovalReason::Explicit, count);
        Ok(conference)
    }

    /// Remove the conference in room `number` only if it has no members.
    ///
    /// Emptiness is re-checked under the registry lock and the conference's
    /// membership mutex, so a member joining concurrently either lands before
    /// (and the conference stays) or is refused as stopping.
    pub fn remove_conference_if_empty(&self, number: &str, reason: RemovalReason) -> bool {
        let (conference, count) = {
            let mut registry = self.registry.lock();
            let Some(conference) = registry.get_by_room(number).cloned() else {
                return false;
            };
            if !conference.stop_if_empty() {
                return false;
            }
            registry.detach(number);
            (conference, registry.by_id.len())
        };
        self.on_removed(&conference, reason, count);
        true
    }

    /// Empty the registry at shutdown, closing every remaining member.
    ///
    /// Returns how many conferences were removed.
    pub fn clear_conference_list(&self) -> usize {
        let drained: Vec<Arc<Conference>> = {
            let mut registry = self.registry.lock();
            registry.by_guid.clear();
            registry.by_room.clear();
            registry.by_id.drain().map(|(_, c)| c).collect()
        };

        for conference in &drained {
            conference.mark_stopping();
            for member in conference.member_list() {
                member.close();
            }
            self.on_removed(conference, RemovalReason::Shutdown, 0);
        }
        info!(target: "mcu.manager", removed = drained.len(), "Conference list cleared");
        drained.len()
    }

    fn on_removed(&self, conference: &Conference, reason: RemovalReason, remaining: usize) {
        metrics::record_conference_removed(reason.as_str());
        metrics::set_conferences_active(remaining);
        info!(
            target: "mcu.manager",
            room = %conference.number(),
            conference_id = conference.list_id(),
            reason = reason.as_str(),
            total_conferences = remaining,
            "Conference removed"
        );
        if let Some(observer) = &self.collaborators.observer {
            observer.on_conference_destroyed(conference.identity());
        }
    }

    // ------------------------------------------------------------------
    // Administrative lookups by room
    // ------------------------------------------------------------------

    #[must_use]
    pub fn find_profile(&self, number: &str, name: &str) -> Option<ConferenceProfile> {
        self.find_conference_by_room(number)?.find_profile(name)
    }

    #[must_use]
    pub fn find_member(&self, number: &str, name: &str) -> Option<Arc<dyn ConferenceMember>> {
        self.find_conference_by_room(number)?.find_member(name)
    }

    #[must_use]
    pub fn find_member_by_name_id(&self, number: &str, name_id: &str) -> Option<Arc<dyn ConferenceMember>> {
        self.find_conference_by_room(number)?
            .find_member_by_name_id(name_id)
    }

    #[must_use]
    pub fn find_member_by_profile_id(&self, number: &str, profile_id: u64) -> Option<Arc<dyn ConferenceMember>> {
        self.find_conference_by_room(number)?
            .find_member_by_profile_id(profile_id)
    }

    /// Identities of every live conference, for listing.
    #[must_use]
    pub fn conference_identities(&self) -> Vec<ConferenceIdentity> {
        self.conference_list()
            .iter()
            .map(|c| c.identity().clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Monitor
    // ------------------------------------------------------------------

    /// Spawn the periodic housekeeping task. It runs until `cancel` fires.
    pub fn start_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        ConferenceMonitor::new(Arc::clone(self)).spawn(cancel)
    }
}

impl std::fmt::Debug for ConferenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceManager")
            .field("config", &self.config)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::member::BridgeMember;

    fn manager(max_conferences: usize) -> ConferenceManager {
        ConferenceManager::new(
            ManagerConfig {
                max_conferences,
                ..ManagerConfig::default()
            },
            Collaborators::default(),
        )
    }

    #[test]
    fn test_make_conference_is_idempotent() {
        let mgr = manager(10);
        let first = mgr.make_conference("100", "Sales").unwrap();
        let second = mgr.make_conference("100", "ignored").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.name(), "Sales");
        assert_eq!(mgr.conference_count(), 1);
    }

    #[test]
    fn test_three_indices_resolve_same_conference() {
        let mgr = manager(10);
        let conf = mgr.make_conference("200", "Support").unwrap();

        let by_id = mgr.find_conference_by_id(conf.list_id()).unwrap();
        let by_guid = mgr.find_conference_by_guid(&conf.guid()).unwrap();
        let by_room = mgr.find_conference_by_room("200").unwrap();
        assert!(Arc::ptr_eq(&by_id, &conf));
        assert!(Arc::ptr_eq(&by_guid, &conf));
        assert!(Arc::ptr_eq(&by_room, &conf));

        assert_eq!(mgr.has_conference_guid(&conf.guid()).as_deref(), Some("200"));
        assert_eq!(mgr.has_conference_room("200"), Some(conf.guid()));
    }

    #[test]
    fn test_capacity_refused() {
        let mgr = manager(1);
        mgr.make_conference("1", "one").unwrap();
        assert!(matches!(
            mgr.make_conference("2", "two").unwrap_err(),
            BridgeError::BridgeFull
        ));
        // Existing room still resolves at capacity.
        assert!(mgr.make_conference("1", "one").is_ok());
    }

    #[test]
    fn test_remove_conference_clears_all_indices() {
        let mgr = manager(10);
        let conf = mgr.make_conference("300", "Ops").unwrap();
        let removed = mgr.remove_conference("300").unwrap();
        assert!(Arc::ptr_eq(&removed, &conf));
        assert!(conf.is_stopping());

        assert!(mgr.find_conference_by_id(conf.list_id()).is_none());
        assert!(mgr.find_conference_by_guid(&conf.guid()).is_none());
        assert!(mgr.find_conference_by_room("300").is_none());
        assert!(matches!(
            mgr.remove_conference("300").unwrap_err(),
            BridgeError::ConferenceNotFound(_)
        ));

        // Room can be reused with a fresh identity.
        let again = mgr.make_conference("300", "Ops").unwrap();
        assert_ne!(again.list_id(), conf.list_id());
        assert_ne!(again.guid(), conf.guid());
    }

    #[test]
    fn test_remove_if_empty_leaves_occupied_conference() {
        let mgr = manager(10);
        let conf = mgr.make_conference("400", "Board").unwrap();
        let alice = Arc::new(BridgeMember::new("Alice", "call-a"));
        conf.add_member(alice.clone()).unwrap();

        assert!(!mgr.remove_conference_if_empty("400", RemovalReason::Idle));
        assert!(!conf.is_stopping());

        conf.remove_member(alice.id()).unwrap();
        assert!(mgr.remove_conference_if_empty("400", RemovalReason::Idle));
        assert!(mgr.find_conference_by_room("400").is_none());
    }

    #[test]
    fn test_member_lookups_by_room() {
        let mgr = manager(10);
        let conf = mgr.make_conference("500", "Lobby").unwrap();
        let alice = Arc::new(BridgeMember::new("Alice", "call-a"));
        conf.add_member(alice.clone()).unwrap();

        let profile = mgr.find_profile("500", "alice").unwrap();
        assert_eq!(mgr.find_member("500", "ALICE").unwrap().id(), alice.id());
        assert_eq!(mgr.find_member_by_name_id("500", "alice").unwrap().id(), alice.id());
        assert_eq!(
            mgr.find_member_by_profile_id("500", profile.id()).unwrap().id(),
            alice.id()
        );
        assert!(mgr.find_member("501", "alice").is_none());
    }

    #[test]
    fn test_clear_conference_list_closes_members() {
        let mgr = manager(10);
        let conf = mgr.make_conference("600", "All hands").unwrap();
        mgr.make_conference("601", "Other").unwrap();
        let alice = Arc::new(BridgeMember::new("Alice", "call-a"));
        conf.add_member(alice.clone()).unwrap();

        assert_eq!(mgr.clear_conference_list(), 2);
        assert_eq!(mgr.conference_count(), 0);
        assert!(conf.is_stopping());
        assert!(alice.core().lock().is_closing());
    }

    #[test]
    fn test_conference_list_ordered_by_id() {
        let mgr = manager(10);
        for room in ["c", "a", "b"] {
            mgr.make_conference(room, room).unwrap();
        }
        let rooms: Vec<String> = mgr
            .conference_list()
            .iter()
            .map(|c| c.number().to_string())
            .collect();
        assert_eq!(rooms, vec!["c", "a", "b"]);
        assert_eq!(mgr.conference_identities().len(), 3);
    }
}
