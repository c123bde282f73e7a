//! The PCM chunk type that moves between every stage of the
//! pipeline after ingress: a fixed-size span of interleaved `f32` samples at
//! a known format, tagged with its source and the playout instant it was
//! captured at.

use crate::formats::AudioFormat;
use crate::tag::SourceTag;
use std::time::Duration;

/// One chunk of interleaved PCM audio, internally always `f32`-normalized
/// regardless of the wire format it arrived in.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    pub source: SourceTag,
    pub format: AudioFormat,
    /// Interleaved samples, `frames() * channels` long.
    pub samples: Vec<f32>,
    /// Position of this chunk on the shared monotonic playout clock.
    pub playout_at: Duration,
}

impl PcmChunk {
    pub fn frames(&self) -> usize {
        let channels = self.format.frame_format.channels.max(1);
        self.samples.len() / channels
    }

    pub fn duration(&self) -> Duration {
        crate::formats::frames_to_duration(self.frames() as u64, self.format.sample_rate)
    }

    pub fn silence(format: AudioFormat, source: SourceTag, frames: usize, playout_at: Duration) -> Self {
        PcmChunk {
            source,
            format,
            samples: vec![0.0; frames * format.frame_format.channels],
            playout_at,
        }
    }
}
