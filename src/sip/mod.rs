//! The source input processor (SIP) pipeline: one instance per
//! (source, route), reading timeshifted chunks for its source and running
//! them through resample → remix → EQ → delay → volume → normalize →
//! DC-filter, re-chunked to the route's fixed chunk size before handing off
//! to a sink's SAM lane.

pub mod dc_filter;
pub mod delay;
pub mod eq;
pub mod normalize;
pub mod remix;
pub mod requantize;
pub mod resample;
pub mod volume;

use crate::error::SipError;
use crate::formats::AudioFormat;
use crate::frame::PcmChunk;
use crate::matrix::Matrix;
use crate::tag::SourceTag;
use dc_filter::DcFilter;
use delay::DelayLine;
use eq::{EqChain, EqGains};
use normalize::Normalizer;
use resample::Resampler;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SipSettings {
    pub gain: f32,
    pub delay_ms: f32,
    pub eq: EqGains,
    /// Applies EQ makeup gain so a boosted band never raises overall level.
    pub eq_normalization: bool,
    /// Runs the peak normalizer/limiter stage.
    pub volume_normalization: bool,
    pub target_peak: f32,
}

impl Default for SipSettings {
    fn default() -> Self {
        SipSettings {
            gain: 1.0,
            delay_ms: 0.0,
            eq: EqGains::default(),
            eq_normalization: true,
            volume_normalization: false,
            target_peak: 0.98,
        }
    }
}

/// Per-(source, route) DSP state. One of these lives behind each SAM lane.
pub struct SourceProcessor {
    out_format: AudioFormat,
    chunk_samples: usize,
    resampler: Resampler,
    matrix: Matrix,
    eq: EqChain,
    eq_makeup_gain: f32,
    delay: DelayLine,
    normalizer: Normalizer,
    volume_normalization: bool,
    dc: DcFilter,
    gain: f32,
    pending: Vec<f32>,
    source: SourceTag,
}

impl SourceProcessor {
    pub fn new(
        source: SourceTag,
        in_format: AudioFormat,
        out_format: AudioFormat,
        matrix: Matrix,
        settings: SipSettings,
        chunk_samples: usize,
    ) -> Self {
        let out_channels = out_format.frame_format.channels;
        let delay_frames = (settings.delay_ms / 1000.0 * out_format.sample_rate as f32) as usize;
        let eq_makeup_gain = if settings.eq_normalization {
            settings.eq.normalization_gain()
        } else {
            1.0
        };
        SourceProcessor {
            out_format,
            chunk_samples,
            resampler: Resampler::new(in_format.frame_format.channels, in_format.sample_rate, out_format.sample_rate),
            matrix,
            eq: EqChain::new(&settings.eq, out_format.sample_rate as f32, out_channels),
            eq_makeup_gain,
            delay: DelayLine::new(out_channels, delay_frames),
            normalizer: Normalizer::new(settings.target_peak),
            volume_normalization: settings.volume_normalization,
            dc: DcFilter::new(out_channels),
            gain: settings.gain,
            pending: Vec::new(),
            source,
        }
    }

    /// Feeds one raw timeshifted chunk through the pipeline, returning as
    /// many fixed-size output chunks as the accumulated pending buffer now
    /// allows. The chunking invariant: every emitted chunk has exactly
    /// `chunk_samples` frames except none ever emitted short.
    pub fn process(&mut self, chunk: PcmChunk) -> Result<Vec<PcmChunk>, SipError> {
        let resampled = self.resampler.process(&chunk.samples);
        let mut remixed = remix::remix(&resampled, &self.matrix)?;
        self.eq.process(&mut remixed);
        volume::apply_gain(&mut remixed, self.eq_makeup_gain);
        let delayed = self.delay.process(&remixed);
        let mut out_samples = delayed;
        volume::apply_gain(&mut out_samples, self.gain);
        if self.volume_normalization {
            self.normalizer.process(&mut out_samples);
        }
        self.dc.process(&mut out_samples);

        self.pending.extend(out_samples);

        let out_channels = self.out_format.frame_format.channels;
        let frame_stride = self.chunk_samples * out_channels;
        let mut chunks = Vec::new();
        let mut playout_at = chunk.playout_at;
        while self.pending.len() >= frame_stride {
            let tail = self.pending.split_off(frame_stride);
            let samples = std::mem::replace(&mut self.pending, tail);
            chunks.push(PcmChunk {
                source: self.source.clone(),
                format: self.out_format,
                samples,
                playout_at,
            });
            playout_at += crate::formats::frames_to_duration(self.chunk_samples as u64, self.out_format.sample_rate);
        }
        Ok(chunks)
    }

    pub fn set_delay_ms(&mut self, delay_ms: f32) {
        let frames = (delay_ms / 1000.0 * self.out_format.sample_rate as f32) as usize;
        self.delay.set_delay_frames(frames);
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    /// Applies a multi-sink sync group's rate-skew bias to this route's
    /// resampler so its output drifts back toward the group's average
    /// pace instead of the sink's local clock alone.
    pub fn set_rate_bias(&mut self, bias: f32) {
        self.resampler.set_rate_bias(bias);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{FrameFormat, SampleFormat};

    fn fmt(rate: u32, channels: usize) -> AudioFormat {
        AudioFormat {
            sample_rate: rate,
            frame_format: FrameFormat {
                channels,
                sample_format: SampleFormat::S16,
            },
        }
    }

    #[test]
    fn emits_only_full_size_chunks() {
        let source = SourceTag::new("s").unwrap();
        let in_format = fmt(48_000, 2);
        let out_format = fmt(48_000, 2);
        let mut processor = SourceProcessor::new(
            source.clone(),
            in_format,
            out_format,
            Matrix::identity(2),
            SipSettings::default(),
            128,
        );
        let chunk = PcmChunk {
            source,
            format: in_format,
            samples: vec![0.1; 200 * 2],
            playout_at: Duration::ZERO,
        };
        let chunks = processor.process(chunk).expect("process");
        for c in &chunks {
            assert_eq!(c.frames(), 128);
        }
    }
}
