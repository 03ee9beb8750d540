//! Conference members.
//!
//! A member is one participant endpoint. The signaling layer owns it; a
//! [`Conference`] only references it. Every member kind embeds a
//! [`MemberCore`] carrying identity, the closable lock, statistics and the
//! listener-side audio caches, and implements [`ConferenceMember`] on top of
//! it, overriding only the hooks its kind changes.
//!
//! Media entry points (`write_audio`, `read_audio`, video) take a soft hold on
//! the member's lock for their whole duration. Once [`ConferenceMember::close`]
//! is called those holds are refused, and [`ConferenceMember::wait_for_close`]
//! returns as soon as the in-flight ones finish.

mod kinds;
pub mod stats;

pub use kinds::{BridgeMember, CacheMember, PipeMember, RecorderMember, StreamMember};
pub use stats::{MemberStats, MUTE_INCOMING_AUDIO, MUTE_OUTGOING_AUDIO};

use crate::audio::{apply_gain, audio_level, AudioCaches, AudioFormat};
use crate::conference::Conference;
use crate::external::VideoFrame;
use crate::lock::{ClosableLock, LockStrength};
use common::types::MemberId;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Closed set of member kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A participant connected through signaling.
    Bridge,
    /// Bridges audio between two conferences.
    Pipe,
    /// Shared encoder cache playing the conference mix.
    Cache,
    /// Recording sink.
    Recorder,
    /// Passive stream source.
    Stream,
}

impl MemberKind {
    /// Everything except `Bridge` is an internal participant.
    #[must_use]
    pub fn is_system(self) -> bool {
        !matches!(self, MemberKind::Bridge)
    }

    /// Whether members of this kind are listed publicly by default.
    #[must_use]
    pub fn default_visible(self) -> bool {
        matches!(self, MemberKind::Bridge | MemberKind::Stream)
    }

    /// Sinks never contribute audio to the mix.
    #[must_use]
    pub fn produces_audio(self) -> bool {
        !matches!(self, MemberKind::Recorder | MemberKind::Cache)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemberKind::Bridge => "bridge",
            MemberKind::Pipe => "pipe",
            MemberKind::Cache => "cache",
            MemberKind::Recorder => "recorder",
            MemberKind::Stream => "stream",
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-side handle a conference keeps for each participating member.
pub trait MemberConnection: Send + Sync {
    fn member_id(&self) -> MemberId;

    /// Deliver a user-input indication (e.g. DTMF) to the member's endpoint.
    fn send_user_input(&self, input: &str);
}

/// Capability interface shared by every member kind.
pub trait ConferenceMember: Send + Sync {
    fn core(&self) -> &MemberCore;

    /// Build the transport-side connection the conference keeps while the
    /// member participates.
    fn create_connection(&self) -> Arc<dyn MemberConnection>;

    fn id(&self) -> MemberId {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn kind(&self) -> MemberKind {
        self.core().kind()
    }

    fn is_visible(&self) -> bool {
        self.core().is_visible()
    }

    /// Request disconnect. Never blocks.
    fn close(&self) {
        self.core().close();
    }

    /// Block until every in-flight media access has released the member.
    fn wait_for_close(&self) {
        self.core().lock().await_closed();
    }

    /// Send audio into the conference. Returns `false` if it was dropped.
    fn write_audio(&self, samples: &[i16], format: AudioFormat) -> bool {
        self.core().write_audio(samples, format)
    }

    /// Fill `out` with the mix of everyone else. Returns `false` (and leaves
    /// silence) if the member is closing or not in a conference.
    fn read_audio(&self, out: &mut [i16], format: AudioFormat) -> bool {
        self.core().read_audio(out, format)
    }

    fn write_video(&self, frame: &VideoFrame) -> bool {
        self.core().write_video(frame)
    }

    fn read_video(&self, frame: &mut VideoFrame) -> bool {
        self.core().read_video(frame)
    }
}

/// State common to every member kind.
#[derive(Debug)]
pub struct MemberCore {
    id: MemberId,
    name: String,
    kind: MemberKind,
    lock: ClosableLock,
    stats: MemberStats,
    joined: AtomicBool,
    visible: AtomicBool,
    conference: RwLock<Weak<Conference>>,
    caches: Mutex<AudioCaches>,
}

impl MemberCore {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            id: MemberId::new(),
            name: name.into(),
            kind,
            lock: ClosableLock::new(),
            stats: MemberStats::new(),
            joined: AtomicBool::new(false),
            visible: AtomicBool::new(kind.default_visible()),
            conference: RwLock::new(Weak::new()),
            caches: Mutex::new(AudioCaches::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> MemberId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    #[must_use]
    pub fn lock(&self) -> &ClosableLock {
        &self.lock
    }

    #[must_use]
    pub fn stats(&self) -> &MemberStats {
        &self.stats
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// Returns the previous visibility.
    pub(crate) fn set_visible(&self, visible: bool) -> bool {
        self.visible.swap(visible, Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    /// Set the joined flag. Succeeds once per participation.
    pub fn mark_joined(&self) -> bool {
        self.joined
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn clear_joined(&self) {
        self.joined.store(false, Ordering::Release);
    }

    /// The conference this member currently participates in.
    #[must_use]
    pub fn conference(&self) -> Option<Arc<Conference>> {
        self.conference.read().upgrade()
    }

    /// Bind to `conference` unless already bound to a different live one.
    pub(crate) fn try_attach(&self, conference: &Arc<Conference>) -> bool {
        let mut current = self.conference.write();
        if let Some(existing) = current.upgrade() {
            if !Arc::ptr_eq(&existing, conference) {
                return false;
            }
        }
        *current = Arc::downgrade(conference);
        true
    }

    /// Unbind, but only from `conference`.
    pub(crate) fn detach(&self, conference: &Conference) {
        let mut current = self.conference.write();
        if std::ptr::eq(current.as_ptr(), conference) {
            *current = Weak::new();
        }
    }

    pub(crate) fn caches(&self) -> MutexGuard<'_, AudioCaches> {
        self.caches.lock()
    }

    /// Position of this member's read cursor into `source`, in source frames.
    #[must_use]
    pub fn reader_position(&self, source: MemberId) -> Option<u64> {
        self.caches.lock().reader(&source).map(|r| r.position())
    }

    /// Number of cached format converters.
    #[must_use]
    pub fn resampler_count(&self) -> usize {
        self.caches.lock().resampler_count()
    }

    pub fn close(&self) {
        if self.lock.begin_close() {
            debug!(
                target: "mcu.member",
                member_id = %self.id,
                member_name = %self.name,
                kind = %self.kind,
                "Member close requested"
            );
        }
    }

    /// Apply input gain and mute, buffer into the conference, track level.
    pub fn write_audio(&self, samples: &[i16], format: AudioFormat) -> bool {
        let Ok(_hold) = self.lock.acquire(LockStrength::Soft) else {
            return false;
        };
        let Some(conference) = self.conference() else {
            return false;
        };
        if self.stats.is_muted(MUTE_INCOMING_AUDIO) {
            return false;
        }

        let gain = self.stats.input_gain();
        let samples: Cow<'_, [i16]> = if (gain - 1.0).abs() < f32::EPSILON {
            Cow::Borrowed(samples)
        } else {
            let mut scaled = samples.to_vec();
            apply_gain(&mut scaled, gain);
            Cow::Owned(scaled)
        };

        if !conference.write_member_audio(self, &samples, format) {
            return false;
        }
        self.stats.record_samples_written(samples.len());
        if let Some(level) = self.stats.update_audio_level(audio_level(&samples)) {
            conference.write_member_audio_level(self, level);
        }
        true
    }

    /// Mix everyone else into `out`, then apply mute and output gain.
    pub fn read_audio(&self, out: &mut [i16], format: AudioFormat) -> bool {
        out.fill(0);
        let Ok(_hold) = self.lock.acquire(LockStrength::Soft) else {
            return false;
        };
        let Some(conference) = self.conference() else {
            return false;
        };

        conference.read_member_audio(self, out, format);
        if self.stats.is_muted(MUTE_OUTGOING_AUDIO) {
            out.fill(0);
        } else {
            apply_gain(out, self.stats.output_gain());
        }
        self.stats.record_samples_read(out.len());
        true
    }

    pub fn write_video(&self, frame: &VideoFrame) -> bool {
        let Ok(_hold) = self.lock.acquire(LockStrength::Soft) else {
            return false;
        };
        let Some(conference) = self.conference() else {
            return false;
        };
        self.stats.record_video_received(frame.width, frame.height);
        conference.write_member_video(self, frame)
    }

    pub fn read_video(&self, frame: &mut VideoFrame) -> bool {
        let Ok(_hold) = self.lock.acquire(LockStrength::Soft) else {
            return false;
        };
        let Some(conference) = self.conference() else {
            return false;
        };
        let produced = conference.read_member_video(self, frame);
        if produced {
            self.stats.record_video_sent();
        } else {
            trace!(target: "mcu.member", member_id = %self.id, "No video for member");
        }
        produced
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_policies() {
        assert!(!MemberKind::Bridge.is_system());
        for kind in [
            MemberKind::Pipe,
            MemberKind::Cache,
            MemberKind::Recorder,
            MemberKind::Stream,
        ] {
            assert!(kind.is_system(), "{kind}");
        }

        assert!(MemberKind::Bridge.default_visible());
        assert!(MemberKind::Stream.default_visible());
        assert!(!MemberKind::Pipe.default_visible());
        assert!(!MemberKind::Cache.default_visible());
        assert!(!MemberKind::Recorder.default_visible());

        assert!(MemberKind::Stream.produces_audio());
        assert!(MemberKind::Pipe.produces_audio());
        assert!(!MemberKind::Recorder.produces_audio());
        assert!(!MemberKind::Cache.produces_audio());
    }

    #[test]
    fn test_mark_joined_once() {
        let core = MemberCore::new("alice", MemberKind::Bridge);
        assert!(!core.is_joined());
        assert!(core.mark_joined());
        assert!(!core.mark_joined());
        core.clear_joined();
        assert!(core.mark_joined());
    }

    #[test]
    fn test_detached_member_reads_silence() {
        let core = MemberCore::new("alice", MemberKind::Bridge);
        let mut out = [7i16; 8];
        assert!(!core.read_audio(&mut out, AudioFormat::NARROWBAND_MONO));
        assert_eq!(out, [0; 8]);
        assert!(!core.write_audio(&[1; 8], AudioFormat::NARROWBAND_MONO));
    }

    #[test]
    fn test_closed_member_refuses_media() {
        let core = MemberCore::new("alice", MemberKind::Bridge);
        core.close();
        assert!(core.lock().is_closing());
        let mut out = [7i16; 4];
        assert!(!core.read_audio(&mut out, AudioFormat::NARROWBAND_MONO));
        assert_eq!(out, [0; 4]);
    }
}
