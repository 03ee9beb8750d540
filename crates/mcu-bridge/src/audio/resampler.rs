//! Sample-rate and channel-count conversion.
//!
//! Every (listener, source) pair whose formats differ gets its own
//! [`Resampler`], so converter history never leaks between sources. Rate
//! conversion runs through `rubato`'s polynomial [`FastFixedIn`] on fixed
//! 10 ms chunks of source audio; converted frames queue inside the
//! resampler until the listener reads them. Pairs with equal rates only go
//! through the channel mapping.
//!
//! Channel policy:
//! - equal counts: copied channel for channel
//! - mono source: duplicated into every destination channel
//! - mono destination: average of all source channels
//! - otherwise: destination channel `c` takes source channel `c % source`

use super::{clamp_to_i16, AudioFormat};
use rubato::{
    FastFixedIn, PolynomialDegree, ResampleError, Resampler as _, ResamplerConstructionError,
};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Source audio handed to the rate converter per step.
const CHUNK_MS: u64 = 10;

/// Headroom rubato reserves for ratio adjustments; the ratio here is fixed.
const MAX_RELATIVE_RATIO: f64 = 2.0;

/// Scale between `i16` samples and rubato's `f32` range.
const FULL_SCALE: f32 = 32768.0;

/// Failure inside the rate converter. The media path turns these into silence.
#[derive(Debug, Error)]
pub enum ResamplerError {
    #[error("resampler construction failed: {0}")]
    Construction(#[from] ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] ResampleError),
}

/// The exact (source, destination) format pair a converter handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResamplerKey {
    pub source: AudioFormat,
    pub destination: AudioFormat,
}

impl ResamplerKey {
    #[must_use]
    pub fn new(source: AudioFormat, destination: AudioFormat) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Source frames spanning the same duration as `output_frames`, rounded up.
    #[must_use]
    pub fn source_frames_for(&self, output_frames: usize) -> u64 {
        let src_rate = u64::from(self.source.sample_rate());
        let dst_rate = u64::from(self.destination.sample_rate());
        (output_frames as u64 * src_rate).div_ceil(dst_rate)
    }
}

struct RateStage {
    inner: FastFixedIn<f32>,
    chunk_frames: usize,
    /// Deinterleaved source chunk, one vector per source channel.
    input: Vec<Vec<f32>>,
    /// Converter output, one vector per source channel.
    output: Vec<Vec<f32>>,
}

/// Stateful converter for one [`ResamplerKey`].
pub struct Resampler {
    key: ResamplerKey,
    /// Absent when source and destination share a sample rate.
    rate: Option<RateStage>,
    /// Converted, interleaved destination samples not yet read.
    pending: VecDeque<i16>,
    frames_produced: u64,
}

impl Resampler {
    /// Build a converter for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ResamplerError::Construction`] if rubato rejects the
    /// parameters.
    pub fn new(key: ResamplerKey) -> Result<Self, ResamplerError> {
        let rate = if key.source.sample_rate() == key.destination.sample_rate() {
            None
        } else {
            let channels = usize::from(key.source.channels());
            let chunk_frames = usize::try_from(key.source.frames_for_ms(CHUNK_MS))
                .unwrap_or(1)
                .max(1);
            let ratio =
                f64::from(key.destination.sample_rate()) / f64::from(key.source.sample_rate());
            let inner = FastFixedIn::<f32>::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Cubic,
                chunk_frames,
                channels,
            )?;
            let output = vec![vec![0.0; inner.output_frames_max()]; channels];
            Some(RateStage {
                inner,
                chunk_frames,
                input: vec![Vec::with_capacity(chunk_frames); channels],
                output,
            })
        };

        Ok(Self {
            key,
            rate,
            pending: VecDeque::new(),
            frames_produced: 0,
        })
    }

    #[must_use]
    pub fn key(&self) -> ResamplerKey {
        self.key
    }

    /// Whether source and destination formats are identical.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.key.source == self.key.destination
    }

    /// Source frames each [`push`](Self::push) must carry, or `None` when
    /// any number of frames is accepted.
    #[must_use]
    pub fn chunk_frames(&self) -> Option<usize> {
        self.rate.as_ref().map(|stage| stage.chunk_frames)
    }

    /// Converted destination frames waiting to be read.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.key.destination.frames_in(self.pending.len())
    }

    /// Total destination frames produced over this converter's lifetime.
    #[must_use]
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    /// Convert interleaved source frames and queue the result.
    ///
    /// With a rate stage `input` must hold exactly
    /// [`chunk_frames`](Self::chunk_frames) frames. Returns the number of
    /// destination frames queued.
    ///
    /// # Errors
    ///
    /// Returns [`ResamplerError::Process`] if rubato refuses the chunk.
    pub fn push(&mut self, input: &[i16]) -> Result<usize, ResamplerError> {
        let src_channels = usize::from(self.key.source.channels());
        let dst_channels = usize::from(self.key.destination.channels());

        let queued = match &mut self.rate {
            None => {
                let frames = input.chunks_exact(src_channels);
                let count = frames.len();
                for frame in frames {
                    for channel in 0..dst_channels {
                        let value = map_channel(src_channels, dst_channels, channel, |c| {
                            frame.get(c).copied().map_or(0.0, f32::from)
                        });
                        self.pending.push_back(clamp_to_i16(value));
                    }
                }
                count
            }
            Some(stage) => {
                for (channel, buf) in stage.input.iter_mut().enumerate() {
                    buf.clear();
                    buf.extend(input.chunks_exact(src_channels).map(|frame| {
                        frame
                            .get(channel)
                            .copied()
                            .map_or(0.0, |s| f32::from(s) / FULL_SCALE)
                    }));
                }
                let (_, produced) =
                    stage
                        .inner
                        .process_into_buffer(&stage.input, &mut stage.output, None)?;
                let output = &stage.output;
                for frame in 0..produced {
                    for channel in 0..dst_channels {
                        let value = map_channel(src_channels, dst_channels, channel, |c| {
                            output
                                .get(c)
                                .and_then(|samples| samples.get(frame))
                                .copied()
                                .unwrap_or(0.0)
                        });
                        self.pending.push_back(clamp_to_i16(value * FULL_SCALE));
                    }
                }
                produced
            }
        };

        self.frames_produced += queued as u64;
        Ok(queued)
    }

    /// Move queued audio into `out` (interleaved, destination format).
    ///
    /// Returns the number of frames written; the rest of `out` is untouched.
    pub fn pop(&mut self, out: &mut [i16]) -> usize {
        let dst_channels = usize::from(self.key.destination.channels());
        let frames = self
            .key
            .destination
            .frames_in(out.len())
            .min(self.pending_frames());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..frames * dst_channels)) {
            *slot = sample;
        }
        frames
    }
}

impl fmt::Debug for Resampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resampler")
            .field("key", &self.key)
            .field("chunk_frames", &self.chunk_frames())
            .field("pending_frames", &self.pending_frames())
            .field("frames_produced", &self.frames_produced)
            .finish_non_exhaustive()
    }
}

/// Value of destination channel `channel`, given a lookup of source channels.
#[allow(clippy::cast_precision_loss)]
fn map_channel(
    src_channels: usize,
    dst_channels: usize,
    channel: usize,
    sample: impl Fn(usize) -> f32,
) -> f32 {
    if src_channels == dst_channels {
        sample(channel)
    } else if src_channels == 1 {
        sample(0)
    } else if dst_channels == 1 {
        (0..src_channels).map(&sample).sum::<f32>() / src_channels as f32
    } else {
        sample(channel % src_channels)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn fmt(rate: u32, channels: u16) -> AudioFormat {
        AudioFormat::new(rate, channels).unwrap()
    }

    /// Push whole chunks of `value` until `frames` destination frames are queued.
    fn feed_constant(resampler: &mut Resampler, value: i16, frames: usize) {
        let chunk = resampler.chunk_frames().unwrap();
        let block = vec![value; resampler.key().source.samples_in(chunk)];
        while resampler.pending_frames() < frames {
            resampler.push(&block).unwrap();
        }
    }

    #[test]
    fn test_passthrough_copies_exactly() {
        let mut resampler = Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(8000, 1))).unwrap();
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.chunk_frames(), None);

        let input: Vec<i16> = (0..160).map(|i| (i * 7) as i16).collect();
        assert_eq!(resampler.push(&input).unwrap(), 160);

        let mut output = vec![0i16; 160];
        assert_eq!(resampler.pop(&mut output), 160);
        assert_eq!(output, input);
        assert_eq!(resampler.pending_frames(), 0);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut resampler = Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(8000, 2))).unwrap();
        resampler.push(&[100, 200, 300]).unwrap();
        let mut output = [0i16; 6];
        assert_eq!(resampler.pop(&mut output), 3);
        assert_eq!(output, [100, 100, 200, 200, 300, 300]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut resampler = Resampler::new(ResamplerKey::new(fmt(8000, 2), fmt(8000, 1))).unwrap();
        resampler.push(&[100, 300, -100, -300]).unwrap();
        let mut output = [0i16; 2];
        resampler.pop(&mut output);
        assert_eq!(output, [200, -200]);
    }

    #[test]
    fn test_rate_change_uses_fixed_chunks() {
        let resampler = Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(16000, 2))).unwrap();
        assert!(!resampler.is_passthrough());
        assert_eq!(resampler.chunk_frames(), Some(80));

        let down = Resampler::new(ResamplerKey::new(fmt(48000, 2), fmt(8000, 1))).unwrap();
        assert_eq!(down.chunk_frames(), Some(480));
    }

    #[test]
    fn test_upsample_doubles_duration_and_keeps_level() {
        let mut resampler =
            Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(16000, 1))).unwrap();

        let chunk = vec![5000i16; 80];
        let mut queued = 0;
        for _ in 0..20 {
            queued += resampler.push(&chunk).unwrap();
        }
        // 1600 source frames: close to 3200 output frames, less the converter delay.
        assert!((3100..=3200).contains(&queued), "queued {queued}");
        assert_eq!(resampler.frames_produced(), queued as u64);

        let mut output = vec![0i16; queued];
        resampler.pop(&mut output);
        let settled = &output[queued / 2..];
        assert!(settled.iter().all(|&s| (i32::from(s) - 5000).abs() <= 1));
    }

    #[test]
    fn test_downsample_halves_duration() {
        let mut resampler =
            Resampler::new(ResamplerKey::new(fmt(16000, 1), fmt(8000, 1))).unwrap();
        let chunk = vec![-1200i16; 160];
        let mut queued = 0;
        for _ in 0..10 {
            queued += resampler.push(&chunk).unwrap();
        }
        assert!((780..=800).contains(&queued), "queued {queued}");

        let mut output = vec![0i16; queued];
        resampler.pop(&mut output);
        assert!(output[queued / 2..]
            .iter()
            .all(|&s| (i32::from(s) + 1200).abs() <= 1));
    }

    #[test]
    fn test_stereo_destination_channels_match() {
        let mut resampler =
            Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(16000, 2))).unwrap();
        feed_constant(&mut resampler, 700, 400);

        let mut output = vec![0i16; 800];
        assert_eq!(resampler.pop(&mut output), 400);
        for frame in output.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_short_chunk_is_refused() {
        let mut resampler =
            Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(16000, 1))).unwrap();
        assert!(matches!(
            resampler.push(&[1, 2, 3]),
            Err(ResamplerError::Process(_))
        ));
        assert_eq!(resampler.pending_frames(), 0);
    }

    #[test]
    fn test_pop_leaves_remainder_queued() {
        let mut resampler = Resampler::new(ResamplerKey::new(fmt(8000, 1), fmt(8000, 1))).unwrap();
        resampler.push(&[1, 2, 3, 4, 5]).unwrap();

        let mut first = [9i16; 3];
        assert_eq!(resampler.pop(&mut first), 3);
        assert_eq!(first, [1, 2, 3]);

        let mut second = [9i16; 4];
        assert_eq!(resampler.pop(&mut second), 2);
        assert_eq!(second, [4, 5, 9, 9]);
    }

    #[test]
    fn test_source_frames_for_rounds_up() {
        let key = ResamplerKey::new(fmt(8000, 1), fmt(16000, 2));
        assert_eq!(key.source_frames_for(320), 160);
        assert_eq!(key.source_frames_for(321), 161);

        let odd = ResamplerKey::new(fmt(44100, 2), fmt(48000, 2));
        assert_eq!(odd.source_frames_for(960), 882);
    }
}
