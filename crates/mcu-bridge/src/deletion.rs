//! Deferred member removal.
//!
//! Signaling callbacks decide a member must go but cannot wait for its media
//! paths to drain. [`schedule_member_removal`] flags the member closing and
//! returns at once; a blocking-pool task waits for the last lock holder,
//! detaches the member from its conference and drops the last reference this
//! side holds.

use crate::conference::Conference;
use crate::errors::BridgeError;
use crate::member::ConferenceMember;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Close `member` and remove it from `conference` once its lock drains.
///
/// The handle resolves to the `remove_member` result: `Ok(true)` if the
/// conference became empty.
pub fn schedule_member_removal(
    conference: Arc<Conference>,
    member: Arc<dyn ConferenceMember>,
) -> JoinHandle<Result<bool, BridgeError>> {
    let member_id = member.id();
    member.close();
    debug!(
        target: "mcu.deletion",
        room = %conference.number(),
        member_id = %member_id,
        holders = member.core().lock().holders(),
        "Member removal scheduled"
    );

    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        member.wait_for_close();
        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = conference.remove_member(member_id);
        drop(member);

        match &result {
            Ok(now_empty) => info!(
                target: "mcu.deletion",
                room = %conference.number(),
                member_id = %member_id,
                waited_ms,
                now_empty,
                "Member removed"
            ),
            Err(e) => warn!(
                target: "mcu.deletion",
                room = %conference.number(),
                member_id = %member_id,
                error = %e,
                "Deferred removal found no member"
            ),
        }
        result
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::conference::ConferenceSettings;
    use crate::external::Collaborators;
    use crate::lock::LockStrength;
    use crate::member::BridgeMember;
    use common::types::ConferenceGuid;
    use std::time::Duration;

    fn conference() -> Arc<Conference> {
        Arc::new(Conference::new(
            1,
            ConferenceGuid::new(),
            "100",
            "room",
            ConferenceSettings::default(),
            Collaborators::default(),
        ))
    }

    #[tokio::test]
    async fn test_removal_waits_for_holders() {
        let conf = conference();
        let alice = Arc::new(BridgeMember::new("Alice", "call-a"));
        conf.add_member(alice.clone()).unwrap();

        let guard = alice.core().lock().acquire(LockStrength::Soft).unwrap();
        let handle = schedule_member_removal(Arc::clone(&conf), alice.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(conf.has_member(alice.id()));

        drop(guard);
        let now_empty = handle.await.unwrap().unwrap();
        assert!(now_empty);
        assert!(conf.member_list().is_empty());
        assert!(alice.core().lock().is_closed());
    }

    #[tokio::test]
    async fn test_removal_of_absent_member_reports_not_found() {
        let conf = conference();
        let stranger = Arc::new(BridgeMember::new("Bob", "call-b"));
        let result = schedule_member_removal(conf, stranger).await.unwrap();
        assert!(matches!(result, Err(BridgeError::MemberNotFound(_))));
    }
}
