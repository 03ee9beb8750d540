//! Per-member audio ring buffer.
//!
//! A member writes its own audio into exactly one [`AudioConnection`]; every
//! other member of the conference reads from it through its own
//! [`AudioReader`] cursor. The ring keeps the most recent `buffer_ms` of
//! audio. Positions are absolute frame counts since the connection was
//! created, so a cursor that falls more than one capacity behind the writer
//! is detected and moved forward rather than reading overwritten data.

use super::{AudioCaches, AudioFormat, AudioReader, Resampler, ResamplerError, ResamplerKey};
use crate::observability::metrics;
use common::types::MemberId;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Ring {
    samples: Vec<i16>,
    /// Total frames ever written.
    write_frame: u64,
}

/// One member's outgoing audio, in the format it was written in.
#[derive(Debug)]
pub struct AudioConnection {
    member_id: MemberId,
    format: AudioFormat,
    /// Distinguishes a replacement connection from the one a reader started on.
    serial: u64,
    capacity_frames: usize,
    ring: Mutex<Ring>,
}

impl AudioConnection {
    /// Create an empty connection holding `buffer_ms` of audio in `format`.
    #[must_use]
    pub fn new(member_id: MemberId, format: AudioFormat, buffer_ms: u64) -> Self {
        let capacity_frames = usize::try_from(format.frames_for_ms(buffer_ms))
            .unwrap_or(usize::MAX)
            .max(1);
        Self {
            member_id,
            format,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            capacity_frames,
            ring: Mutex::new(Ring {
                samples: vec![0; format.samples_in(capacity_frames)],
                write_frame: 0,
            }),
        }
    }

    #[must_use]
    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    #[must_use]
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Total frames written so far.
    #[must_use]
    pub fn write_position(&self) -> u64 {
        self.ring.lock().write_frame
    }

    /// Writer position as a millisecond time index.
    #[must_use]
    pub fn time_index(&self) -> u64 {
        self.format.ms_for_frames(self.write_position())
    }

    /// Append interleaved samples. A trailing partial frame is ignored; a
    /// block longer than the ring keeps only its most recent frames.
    pub fn write(&self, samples: &[i16]) {
        let channels = usize::from(self.format.channels());
        let frames = self.format.frames_in(samples.len());
        if frames == 0 {
            return;
        }

        let skip = frames.saturating_sub(self.capacity_frames);
        let Some(tail) = samples.get(skip * channels..frames * channels) else {
            return;
        };

        let mut ring = self.ring.lock();
        let start = ring.write_frame + skip as u64;
        let offset = self.ring_offset(start);
        let first = (self.capacity_frames - offset).min(frames - skip);

        let (head, wrapped) = tail.split_at(first * channels);
        if let Some(dst) = ring.samples.get_mut(offset * channels..(offset + first) * channels) {
            dst.copy_from_slice(head);
        }
        if let Some(dst) = ring.samples.get_mut(..wrapped.len()) {
            dst.copy_from_slice(wrapped);
        }
        ring.write_frame += frames as u64;
    }

    /// Read this connection's audio for one listener and convert it into
    /// `out` (interleaved, `destination` format).
    ///
    /// Uses and updates the listener's cached reader and converter for this
    /// source. A new reader starts at the most recent span of the requested
    /// duration; a reader that fell more than the buffer capacity behind is
    /// moved forward to that same span and its converter restarted. Output
    /// not covered by written audio is silence, as is everything when the
    /// converter fails.
    ///
    /// Returns the number of destination frames carrying real audio.
    pub fn read(&self, caches: &mut AudioCaches, out: &mut [i16], destination: AudioFormat) -> usize {
        let key = ResamplerKey::new(self.format, destination);
        let slot = (self.member_id, key);
        let dst_frames = destination.frames_in(out.len());

        let AudioCaches {
            readers,
            resamplers,
            scratch,
            ..
        } = caches;

        let mut restart = false;
        let reader = readers.entry(self.member_id).or_insert_with(|| {
            restart = true;
            AudioReader::new(self.serial, 0, self.format)
        });
        if reader.connection_serial != self.serial {
            *reader = AudioReader::new(self.serial, 0, self.format);
            restart = true;
        }
        if restart {
            // Converters for an earlier connection of this source are stale.
            resamplers.retain(|(source, _), _| *source != self.member_id);
        }

        {
            let ring = self.ring.lock();
            let write = ring.write_frame;
            let capacity = self.capacity_frames as u64;
            let needed = key.source_frames_for(dst_frames).min(capacity);

            if restart {
                reader.position = write - needed.min(write);
            } else if write - reader.position.min(write) > capacity {
                debug!(
                    target: "mcu.audio",
                    source = %self.member_id,
                    lag_frames = write - reader.position,
                    "Reader fell behind buffer window, resyncing"
                );
                metrics::record_reader_resync();
                reader.position = write - needed;
                resamplers.remove(&slot);
            }
        }

        let resampler = match resamplers.entry(slot) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match Resampler::new(key) {
                Ok(resampler) => entry.insert(resampler),
                Err(e) => {
                    warn!(
                        target: "mcu.audio",
                        source = %self.member_id,
                        error = %e,
                        "Could not build resampler, source is silent for this listener"
                    );
                    metrics::record_audio_degraded("resampler");
                    out.fill(0);
                    return 0;
                }
            },
        };

        if let Err(e) = self.fill(reader, resampler, scratch, dst_frames) {
            warn!(
                target: "mcu.audio",
                source = %self.member_id,
                error = %e,
                "Resampling failed, restarting converter"
            );
            metrics::record_audio_degraded("resampler");
            resamplers.remove(&slot);
            out.fill(0);
            return 0;
        }

        let produced = resampler.pop(out);
        let filled = destination.samples_in(produced);
        if let Some(rest) = out.get_mut(filled..) {
            rest.fill(0);
        }
        if produced < dst_frames {
            metrics::record_audio_degraded("underrun");
        }
        produced
    }

    /// Feed `resampler` from the ring until it holds `dst_frames` or the
    /// unread audio runs out. Rate conversion only takes whole chunks; a
    /// partial chunk stays in the ring for the next read.
    fn fill(
        &self,
        reader: &mut AudioReader,
        resampler: &mut Resampler,
        scratch: &mut Vec<i16>,
        dst_frames: usize,
    ) -> Result<(), ResamplerError> {
        let capacity = self.capacity_frames as u64;
        while resampler.pending_frames() < dst_frames {
            let wanted = (dst_frames - resampler.pending_frames()) as u64;
            {
                let ring = self.ring.lock();
                let available = ring.write_frame.saturating_sub(reader.position);
                if available > capacity {
                    // Lapped mid-read; the next read resyncs.
                    break;
                }
                let take = match resampler.chunk_frames() {
                    Some(chunk) if available >= chunk as u64 => chunk as u64,
                    Some(_) => 0,
                    None => available.min(wanted),
                };
                if take == 0 {
                    break;
                }
                self.copy_frames(&ring, reader.position, take, scratch);
                reader.position += take;
            }
            resampler.push(scratch)?;
        }
        Ok(())
    }

    fn ring_offset(&self, frame: u64) -> usize {
        // Remainder is below capacity_frames, which is a usize.
        #[allow(clippy::cast_possible_truncation)]
        let offset = (frame % self.capacity_frames as u64) as usize;
        offset
    }

    /// Copy `count` frames starting at absolute frame `from` into `dst`.
    fn copy_frames(&self, ring: &Ring, from: u64, count: u64, dst: &mut Vec<i16>) {
        dst.clear();
        let channels = usize::from(self.format.channels());
        let count = usize::try_from(count).unwrap_or(0).min(self.capacity_frames);
        if count == 0 {
            return;
        }

        let offset = self.ring_offset(from);
        let first = (self.capacity_frames - offset).min(count);
        if let Some(head) = ring.samples.get(offset * channels..(offset + first) * channels) {
            dst.extend_from_slice(head);
        }
        if let Some(wrapped) = ring.samples.get(..(count - first) * channels) {
            dst.extend_from_slice(wrapped);
        }
    }
}
