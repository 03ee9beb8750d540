//! Concrete member kinds.

use super::{ConferenceMember, MemberConnection, MemberCore, MemberKind};
use crate::audio::AudioFormat;
use common::types::MemberId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Connection for internal members: there is no remote endpoint, so user
/// input is dropped.
#[derive(Debug)]
struct SystemConnection {
    member_id: MemberId,
    kind: MemberKind,
}

impl MemberConnection for SystemConnection {
    fn member_id(&self) -> MemberId {
        self.member_id
    }

    fn send_user_input(&self, input: &str) {
        trace!(
            target: "mcu.member",
            member_id = %self.member_id,
            kind = %self.kind,
            len = input.len(),
            "Dropping user input for internal member"
        );
    }
}

fn system_connection(core: &MemberCore) -> Arc<dyn MemberConnection> {
    Arc::new(SystemConnection {
        member_id: core.id(),
        kind: core.kind(),
    })
}

// ============================================================================
// Bridge
// ============================================================================

/// A participant that arrived through call signaling.
#[derive(Debug)]
pub struct BridgeMember {
    core: MemberCore,
    call_token: String,
    inbox: Arc<Mutex<Vec<String>>>,
}

impl BridgeMember {
    #[must_use]
    pub fn new(name: impl Into<String>, call_token: impl Into<String>) -> Self {
        Self {
            core: MemberCore::new(name, MemberKind::Bridge),
            call_token: call_token.into(),
            inbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Signaling-layer handle of the call behind this member.
    #[must_use]
    pub fn call_token(&self) -> &str {
        &self.call_token
    }

    /// User-input indications delivered to this member, oldest first.
    #[must_use]
    pub fn received_user_input(&self) -> Vec<String> {
        self.inbox.lock().clone()
    }
}

#[derive(Debug)]
struct BridgeConnection {
    member_id: MemberId,
    inbox: Arc<Mutex<Vec<String>>>,
}

impl MemberConnection for BridgeConnection {
    fn member_id(&self) -> MemberId {
        self.member_id
    }

    fn send_user_input(&self, input: &str) {
        self.inbox.lock().push(input.to_string());
    }
}

impl ConferenceMember for BridgeMember {
    fn core(&self) -> &MemberCore {
        &self.core
    }

    fn create_connection(&self) -> Arc<dyn MemberConnection> {
        Arc::new(BridgeConnection {
            member_id: self.core.id(),
            inbox: Arc::clone(&self.inbox),
        })
    }
}

// ============================================================================
// Pipe
// ============================================================================

/// Carries audio between this conference and another room.
#[derive(Debug)]
pub struct PipeMember {
    core: MemberCore,
    peer_room: String,
}

impl PipeMember {
    #[must_use]
    pub fn new(name: impl Into<String>, peer_room: impl Into<String>) -> Self {
        Self {
            core: MemberCore::new(name, MemberKind::Pipe),
            peer_room: peer_room.into(),
        }
    }

    #[must_use]
    pub fn peer_room(&self) -> &str {
        &self.peer_room
    }
}

impl ConferenceMember for PipeMember {
    fn core(&self) -> &MemberCore {
        &self.core
    }

    fn create_connection(&self) -> Arc<dyn MemberConnection> {
        system_connection(&self.core)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Pulls the conference mix in one fixed format for a shared encoder.
#[derive(Debug)]
pub struct CacheMember {
    core: MemberCore,
    format: AudioFormat,
}

impl CacheMember {
    #[must_use]
    pub fn new(name: impl Into<String>, format: AudioFormat) -> Self {
        Self {
            core: MemberCore::new(name, MemberKind::Cache),
            format,
        }
    }

    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Read the mix in the cache's own format.
    pub fn fill(&self, out: &mut [i16]) -> bool {
        self.read_audio(out, self.format)
    }
}

impl ConferenceMember for CacheMember {
    fn core(&self) -> &MemberCore {
        &self.core
    }

    fn create_connection(&self) -> Arc<dyn MemberConnection> {
        system_connection(&self.core)
    }

    fn write_audio(&self, _samples: &[i16], _format: AudioFormat) -> bool {
        false
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Recording sink: hears the conference, never speaks into it.
#[derive(Debug)]
pub struct RecorderMember {
    core: MemberCore,
}

impl RecorderMember {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: MemberCore::new(name, MemberKind::Recorder),
        }
    }
}

impl ConferenceMember for RecorderMember {
    fn core(&self) -> &MemberCore {
        &self.core
    }

    fn create_connection(&self) -> Arc<dyn MemberConnection> {
        system_connection(&self.core)
    }

    fn write_audio(&self, _samples: &[i16], _format: AudioFormat) -> bool {
        false
    }
}

// ============================================================================
// Stream
// ============================================================================

/// Passive source feeding a media stream into the conference.
#[derive(Debug)]
pub struct StreamMember {
    core: MemberCore,
    source: String,
}

impl StreamMember {
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            core: MemberCore::new(name, MemberKind::Stream),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ConferenceMember for StreamMember {
    fn core(&self) -> &MemberCore {
        &self.core
    }

    fn create_connection(&self) -> Arc<dyn MemberConnection> {
        system_connection(&self.core)
    }
}
