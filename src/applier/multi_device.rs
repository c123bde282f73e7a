//! Multi-device RTP channel mapping: splits one sink's mixed output across
//! several RTP receivers, each taking an ordered pair of channels from the
//! mix, the way a single logical multi-channel sink fans out onto
//! per-speaker stereo RTP devices (`ChannelMapping` in
//! `original_source/screamrouter/screamrouter_types/configuration.py`).

use crate::formats::{AudioFormat, FrameFormat, SampleFormat};
use crate::frame::PcmChunk;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMapping {
    pub receiver_sink_name: String,
    pub left_channel_index: usize,
    pub right_channel_index: usize,
}

/// Extracts one stereo chunk per mapping from `mixed`. A mapping whose
/// channel indices don't fit the mix's channel count is skipped rather
/// than given placeholder silence, so one misconfigured receiver doesn't
/// hide every other receiver's audio.
pub fn split_for_receivers(mixed: &PcmChunk, mappings: &[ChannelMapping]) -> Vec<(String, PcmChunk)> {
    let channels = mixed.format.frame_format.channels;
    let frames = mixed.frames();
    let out_format = AudioFormat {
        sample_rate: mixed.format.sample_rate,
        frame_format: FrameFormat {
            channels: 2,
            sample_format: SampleFormat::S16,
        },
    };
    mappings
        .iter()
        .filter(|m| m.left_channel_index < channels && m.right_channel_index < channels)
        .map(|m| {
            let mut samples = Vec::with_capacity(frames * 2);
            for frame in 0..frames {
                let base = frame * channels;
                samples.push(mixed.samples[base + m.left_channel_index]);
                samples.push(mixed.samples[base + m.right_channel_index]);
            }
            (
                m.receiver_sink_name.clone(),
                PcmChunk {
                    source: mixed.source.clone(),
                    format: out_format,
                    samples,
                    playout_at: mixed.playout_at,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::SourceTag;
    use std::time::Duration;

    fn mixed_chunk(channels: usize) -> PcmChunk {
        let frames = 4;
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for ch in 0..channels {
                samples.push((frame * channels + ch) as f32);
            }
        }
        PcmChunk {
            source: SourceTag::new("sink").unwrap(),
            format: AudioFormat {
                sample_rate: 48_000,
                frame_format: FrameFormat {
                    channels,
                    sample_format: SampleFormat::S16,
                },
            },
            samples,
            playout_at: Duration::ZERO,
        }
    }

    #[test]
    fn extracts_requested_channel_pair() {
        let mixed = mixed_chunk(4);
        let mappings = vec![ChannelMapping {
            receiver_sink_name: "front".into(),
            left_channel_index: 0,
            right_channel_index: 1,
        }];
        let split = split_for_receivers(&mixed, &mappings);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].0, "front");
        assert_eq!(split[0].1.samples, vec![0.0, 1.0, 4.0, 5.0, 8.0, 9.0, 12.0, 13.0]);
    }

    #[test]
    fn out_of_range_mapping_is_skipped_not_placeholdered() {
        let mixed = mixed_chunk(2);
        let mappings = vec![
            ChannelMapping {
                receiver_sink_name: "rear".into(),
                left_channel_index: 2,
                right_channel_index: 3,
            },
            ChannelMapping {
                receiver_sink_name: "front".into(),
                left_channel_index: 0,
                right_channel_index: 1,
            },
        ];
        let split = split_for_receivers(&mixed, &mappings);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].0, "front");
    }
}
