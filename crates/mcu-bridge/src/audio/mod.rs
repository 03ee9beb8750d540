//! Audio pipeline: per-member ring buffers, per-listener readers, cached
//! resamplers and the saturating mix primitive.
//!
//! All audio is signed 16-bit PCM, interleaved by channel. A "frame" is one
//! sample per channel.

mod connection;
mod reader;
mod resampler;

pub use connection::AudioConnection;
pub use reader::{AudioCaches, AudioReader};
pub use resampler::{Resampler, ResamplerError, ResamplerKey};

use thiserror::Error;

/// Highest accepted sample rate.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Highest accepted channel count.
pub const MAX_CHANNELS: u16 = 8;

/// Rejected audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid sample rate: {0}")]
    SampleRate(u32),

    #[error("invalid channel count: {0}")]
    Channels(u16),
}

/// Sample rate and channel count of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    channels: u16,
}

impl AudioFormat {
    /// 8 kHz mono, the format a member is assumed to speak until it writes.
    pub const NARROWBAND_MONO: AudioFormat = AudioFormat {
        sample_rate: 8000,
        channels: 1,
    };

    /// Validate and build a format.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if the rate or channel count is out of range.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, FormatError> {
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(FormatError::SampleRate(sample_rate));
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(FormatError::Channels(channels));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of whole frames in `samples` interleaved samples.
    #[must_use]
    pub fn frames_in(&self, samples: usize) -> usize {
        samples / usize::from(self.channels)
    }

    /// Number of samples in `frames` frames.
    #[must_use]
    pub fn samples_in(&self, frames: usize) -> usize {
        frames * usize::from(self.channels)
    }

    /// Number of frames covering `ms` milliseconds.
    #[must_use]
    pub fn frames_for_ms(&self, ms: u64) -> u64 {
        u64::from(self.sample_rate) * ms / 1000
    }

    /// Millisecond time index reached after `frames` frames.
    #[must_use]
    pub fn ms_for_frames(&self, frames: u64) -> u64 {
        frames * 1000 / u64::from(self.sample_rate)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::NARROWBAND_MONO
    }
}

/// Add `src` into `dst` sample by sample with saturation.
///
/// Addition saturates at the `i16` range, so mixing order across sources
/// only matters where a partial sum clips.
pub fn mix(src: &[i16], dst: &mut [i16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = d.saturating_add(*s);
    }
}

/// Scale samples by a linear gain, clamping to the `i16` range.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = clamp_to_i16(f32::from(*sample) * gain);
    }
}

/// Mean absolute amplitude of a block, `0..=32768`.
#[must_use]
pub fn audio_level(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u64 = samples.iter().map(|s| u64::from(s.unsigned_abs())).sum();
    // Mean of u16 magnitudes always fits in u32.
    #[allow(clippy::cast_possible_truncation)]
    let level = (sum / samples.len() as u64) as u32;
    level
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn clamp_to_i16(value: f32) -> i16 {
    value.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
