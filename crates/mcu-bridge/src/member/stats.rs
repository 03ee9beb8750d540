//! Lock-free per-member media statistics and settings.
//!
//! Only the member's own media path writes these; reporting code reads them
//! with relaxed loads.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Drop the member's incoming audio (nothing it says reaches the mix).
pub const MUTE_INCOMING_AUDIO: u32 = 1;
/// Silence what the member hears.
pub const MUTE_OUTGOING_AUDIO: u32 = 1 << 1;

/// Minimum level change that triggers an audio-level notification.
pub const LEVEL_REPORT_THRESHOLD: u32 = 64;

/// Highest accepted linear gain (about +24 dB).
pub const MAX_GAIN: f32 = 16.0;

#[derive(Debug)]
pub struct MemberStats {
    created: Instant,
    audio_level: AtomicU32,
    reported_level: AtomicU32,
    samples_written: AtomicU64,
    samples_read: AtomicU64,
    /// `f32` bit patterns.
    input_gain: AtomicU32,
    output_gain: AtomicU32,
    mute_mask: AtomicU32,
    video_tx_frames: AtomicU64,
    video_rx_frames: AtomicU64,
    /// Milliseconds since `created` plus one; zero means no frame yet.
    video_tx_first_ms: AtomicU64,
    video_rx_first_ms: AtomicU64,
    rx_frame_width: AtomicU32,
    rx_frame_height: AtomicU32,
}

impl Default for MemberStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            audio_level: AtomicU32::new(0),
            reported_level: AtomicU32::new(0),
            samples_written: AtomicU64::new(0),
            samples_read: AtomicU64::new(0),
            input_gain: AtomicU32::new(1.0f32.to_bits()),
            output_gain: AtomicU32::new(1.0f32.to_bits()),
            mute_mask: AtomicU32::new(0),
            video_tx_frames: AtomicU64::new(0),
            video_rx_frames: AtomicU64::new(0),
            video_tx_first_ms: AtomicU64::new(0),
            video_rx_first_ms: AtomicU64::new(0),
            rx_frame_width: AtomicU32::new(0),
            rx_frame_height: AtomicU32::new(0),
        }
    }

    // --- audio level ---

    #[must_use]
    pub fn audio_level(&self) -> u32 {
        self.audio_level.load(Ordering::Relaxed)
    }

    /// Level last passed to the audio-level side channel.
    #[must_use]
    pub fn previous_audio_level(&self) -> u32 {
        self.reported_level.load(Ordering::Relaxed)
    }

    /// Store a fresh level. Returns it if it moved far enough from the last
    /// reported level to be worth a notification.
    pub(crate) fn update_audio_level(&self, level: u32) -> Option<u32> {
        self.audio_level.store(level, Ordering::Relaxed);
        let reported = self.reported_level.load(Ordering::Relaxed);
        if level.abs_diff(reported) > LEVEL_REPORT_THRESHOLD {
            self.reported_level.store(level, Ordering::Relaxed);
            Some(level)
        } else {
            None
        }
    }

    // --- sample counters ---

    pub(crate) fn record_samples_written(&self, samples: usize) {
        self.samples_written
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_samples_read(&self, samples: usize) {
        self.samples_read.fetch_add(samples as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn samples_read(&self) -> u64 {
        self.samples_read.load(Ordering::Relaxed)
    }

    // --- gains ---

    /// Linear gain applied to audio the member writes.
    #[must_use]
    pub fn input_gain(&self) -> f32 {
        f32::from_bits(self.input_gain.load(Ordering::Relaxed))
    }

    pub fn set_input_gain(&self, gain: f32) {
        self.input_gain
            .store(clamp_gain(gain).to_bits(), Ordering::Relaxed);
    }

    pub fn set_input_gain_db(&self, db: f32) {
        self.set_input_gain(db_to_gain(db));
    }

    /// Linear gain applied to the mix the member hears.
    #[must_use]
    pub fn output_gain(&self) -> f32 {
        f32::from_bits(self.output_gain.load(Ordering::Relaxed))
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.output_gain
            .store(clamp_gain(gain).to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_gain_db(&self, db: f32) {
        self.set_output_gain(db_to_gain(db));
    }

    // --- mute ---

    #[must_use]
    pub fn mute_mask(&self) -> u32 {
        self.mute_mask.load(Ordering::Relaxed)
    }

    pub fn set_mute_mask(&self, mask: u32) {
        self.mute_mask.store(mask, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_muted(&self, flag: u32) -> bool {
        self.mute_mask() & flag != 0
    }

    // --- video ---

    pub(crate) fn record_video_sent(&self) {
        let now = self.elapsed_ms();
        let _ = self.video_tx_first_ms.compare_exchange(
            0,
            now + 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.video_tx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_video_received(&self, width: u32, height: u32) {
        let now = self.elapsed_ms();
        let _ = self.video_rx_first_ms.compare_exchange(
            0,
            now + 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.video_rx_frames.fetch_add(1, Ordering::Relaxed);
        self.rx_frame_width.store(width, Ordering::Relaxed);
        self.rx_frame_height.store(height, Ordering::Relaxed);
    }

    #[must_use]
    pub fn video_tx_frames(&self) -> u64 {
        self.video_tx_frames.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn video_rx_frames(&self) -> u64 {
        self.video_rx_frames.load(Ordering::Relaxed)
    }

    /// Frames per second sent since the first sent frame.
    #[must_use]
    pub fn video_tx_rate(&self) -> f64 {
        frame_rate(
            self.video_tx_frames(),
            self.video_tx_first_ms.load(Ordering::Relaxed),
            self.elapsed_ms() + 1,
        )
    }

    /// Frames per second received since the first received frame.
    #[must_use]
    pub fn video_rx_rate(&self) -> f64 {
        frame_rate(
            self.video_rx_frames(),
            self.video_rx_first_ms.load(Ordering::Relaxed),
            self.elapsed_ms() + 1,
        )
    }

    /// Dimensions of the last received frame.
    #[must_use]
    pub fn rx_frame_size(&self) -> (u32, u32) {
        (
            self.rx_frame_width.load(Ordering::Relaxed),
            self.rx_frame_height.load(Ordering::Relaxed),
        )
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        1.0
    } else {
        gain.clamp(0.0, MAX_GAIN)
    }
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Rate over the interval from the first frame (`first_ms`, zero if none) to
/// `now_ms`. The first frame opens the interval, so it is not counted.
#[allow(clippy::cast_precision_loss)]
fn frame_rate(frames: u64, first_ms: u64, now_ms: u64) -> f64 {
    if first_ms == 0 || frames < 2 || now_ms <= first_ms {
        return 0.0;
    }
    (frames - 1) as f64 * 1000.0 / (now_ms - first_ms) as f64
}
