//! Per-listener read state.

use super::{mix, AudioConnection, AudioFormat, Resampler, ResamplerKey};
use common::types::MemberId;
use std::collections::HashMap;
use std::sync::Arc;

/// A listener's cursor into one source's [`AudioConnection`].
#[derive(Debug, Clone)]
pub struct AudioReader {
    pub(super) connection_serial: u64,
    /// Next unread source frame.
    pub(super) position: u64,
    pub(super) format: AudioFormat,
}

impl AudioReader {
    pub(super) fn new(connection_serial: u64, position: u64, format: AudioFormat) -> Self {
        Self {
            connection_serial,
            position,
            format,
        }
    }

    /// Source frame this reader will consume next.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Cursor expressed as a millisecond time index in the source timeline.
    #[must_use]
    pub fn time_index(&self) -> u64 {
        self.format.ms_for_frames(self.position)
    }
}

/// Everything a listening member caches to hear the rest of its conference.
///
/// Owned by the listener, never shared. Readers are keyed by source member;
/// converters by source member and format pair, so each source keeps its own
/// conversion history.
#[derive(Debug, Default)]
pub struct AudioCaches {
    pub(super) readers: HashMap<MemberId, AudioReader>,
    pub(super) resamplers: HashMap<(MemberId, ResamplerKey), Resampler>,
    /// Source frames copied out of a ring.
    pub(super) scratch: Vec<i16>,
    /// One source's contribution before it is mixed in.
    block: Vec<i16>,
}

impl AudioCaches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader for `source`, if this listener has heard it.
    #[must_use]
    pub fn reader(&self, source: &MemberId) -> Option<&AudioReader> {
        self.readers.get(source)
    }

    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    #[must_use]
    pub fn resampler_count(&self) -> usize {
        self.resamplers.len()
    }

    #[must_use]
    pub fn has_resampler(&self, source: &MemberId, key: &ResamplerKey) -> bool {
        self.resamplers.contains_key(&(*source, *key))
    }

    /// Read every connection in `sources` and mix them into `out`, which is
    /// overwritten.
    ///
    /// Returns how many sources contributed audio.
    pub fn mix_sources(
        &mut self,
        sources: &[Arc<AudioConnection>],
        out: &mut [i16],
        format: AudioFormat,
    ) -> usize {
        out.fill(0);
        let mut block = std::mem::take(&mut self.block);
        block.clear();
        block.resize(out.len(), 0);

        let mut mixed = 0;
        for source in sources {
            if source.read(self, &mut block, format) > 0 {
                mix(&block, out);
                mixed += 1;
            }
        }

        self.block = block;
        mixed
    }

    /// Drop readers and converters whose source no longer passes `keep`.
    ///
    /// Returns how many readers were pruned.
    pub fn retain_sources(&mut self, mut keep: impl FnMut(&MemberId) -> bool) -> usize {
        let before = self.readers.len();
        self.readers.retain(|id, _| keep(id));
        let readers = &self.readers;
        self.resamplers
            .retain(|(id, _), _| readers.contains_key(id));
        before - self.readers.len()
    }

    /// Forget every reader and converter.
    pub fn clear(&mut self) {
        self.readers.clear();
        self.resamplers.clear();
        self.scratch.clear();
        self.block.clear();
    }
}
