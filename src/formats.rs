//! PCM format primitives shared by every stage of the pipeline: sample
//! formats, frame layout, channel masks and the frame/duration conversions
//! the timeshift buffer and SIP pipeline both depend on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type FramesPerSecond = u32;
pub type Frames = u64;
pub type MilliSeconds = f64;
pub type Seconds = f64;

pub const NANOS_PER_SEC: u128 = 1_000_000_000;
pub const MICROS_PER_MILLI_F: f64 = 1_000.0;

/// One fixed logical unit of audio as it moves through the engine.
pub const CHUNK_SAMPLES: usize = 1152;

/// Bound on a source tag's encoded length.
pub const TAG_MAX_LEN: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    S16,
    S24,
    S32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S24 => 3,
            SampleFormat::S32 => 4,
        }
    }

    pub fn from_bit_depth(bit_depth: u8) -> Option<Self> {
        match bit_depth {
            16 => Some(SampleFormat::S16),
            24 => Some(SampleFormat::S24),
            32 => Some(SampleFormat::S32),
            _ => None,
        }
    }

    pub fn bit_depth(self) -> u8 {
        match self {
            SampleFormat::S16 => 16,
            SampleFormat::S24 => 24,
            SampleFormat::S32 => 32,
        }
    }

    /// Reads one sample from a little-endian byte slice and returns it
    /// normalized to `[-1.0, 1.0]` as `f32`, the engine's internal working format.
    pub fn read_sample(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::S16 => {
                let v = i16::from_le_bytes([bytes[0], bytes[1]]);
                v as f32 / i16::MAX as f32
            }
            SampleFormat::S24 => {
                let mut b = [bytes[0], bytes[1], bytes[2], 0];
                let v = i32::from_le_bytes(b) << 8 >> 8;
                b[3] = if v < 0 { 0xFF } else { 0 };
                v as f32 / 8_388_607.0
            }
            SampleFormat::S32 => {
                let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                v as f32 / i32::MAX as f32
            }
        }
    }

    pub fn write_sample(self, sample: f32, dest: &mut [u8]) {
        let clamped = sample.clamp(-1.0, 1.0);
        match self {
            SampleFormat::S16 => {
                let v = (clamped * i16::MAX as f32) as i16;
                dest.copy_from_slice(&v.to_le_bytes());
            }
            SampleFormat::S24 => {
                let v = (clamped * 8_388_607.0) as i32;
                let b = v.to_le_bytes();
                dest.copy_from_slice(&b[..3]);
            }
            SampleFormat::S32 => {
                let v = (clamped * i32::MAX as f32) as i32;
                dest.copy_from_slice(&v.to_le_bytes());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameFormat {
    pub channels: usize,
    pub sample_format: SampleFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: FramesPerSecond,
    pub frame_format: FrameFormat,
}

impl AudioFormat {
    pub fn bytes_per_frame(&self) -> usize {
        bytes_per_frame(self.frame_format.channels, self.frame_format.sample_format)
    }
}

pub fn bytes_per_frame(channels: usize, sample_format: SampleFormat) -> usize {
    channels * sample_format.bytes_per_sample()
}

pub fn duration_to_frames(duration: Duration, sample_rate: FramesPerSecond) -> f64 {
    duration.as_secs_f64() * sample_rate as f64
}

pub fn frames_to_duration(frames: Frames, sample_rate: FramesPerSecond) -> Duration {
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

pub fn frames_to_duration_float(frames: f64, sample_rate: FramesPerSecond) -> Duration {
    Duration::from_secs_f64(frames / sample_rate as f64)
}

pub fn to_link_offset(samples: usize, sample_rate: FramesPerSecond) -> MilliSeconds {
    samples as f64 * 1000.0 / sample_rate as f64
}

/// Supported sample rates.
pub const SUPPORTED_SAMPLE_RATES: [FramesPerSecond; 5] = [44_100, 48_000, 88_200, 96_000, 192_000];

pub mod channel_mask {
    //! The Scream wire channel-mask table, carried verbatim from
    //! `original_source/screamrouter/audio/scream_header_parser.py`'s
    //! `CHANNEL_LAYOUT_TABLE`, including the "5.1 rear" vs "5.1(side)"
    //! disambiguation, which is a real ambiguity in the wire format rather
    //! than something safe to collapse.

    /// Named speaker layout as carried in a Scream wire header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChannelLayout {
        Mono,
        Stereo,
        Quad,
        Surround,
        ThreeOne,
        FourZero,
        FiveOneSide,
        SevenOne,
        FiveOneRear,
    }

    impl ChannelLayout {
        pub fn name(self) -> &'static str {
            match self {
                ChannelLayout::Mono => "mono",
                ChannelLayout::Stereo => "stereo",
                ChannelLayout::Quad => "quad",
                ChannelLayout::Surround => "surround",
                ChannelLayout::ThreeOne => "3.1",
                ChannelLayout::FourZero => "4.0",
                ChannelLayout::FiveOneSide => "5.1(side)",
                ChannelLayout::SevenOne => "7.1",
                ChannelLayout::FiveOneRear => "5.1",
            }
        }

        pub fn mask(self) -> (u8, u8) {
            match self {
                ChannelLayout::Stereo => (0x03, 0x00),
                ChannelLayout::Mono => (0x04, 0x00),
                ChannelLayout::Quad => (0x33, 0x00),
                ChannelLayout::Surround => (0x34, 0x01),
                ChannelLayout::ThreeOne => (0x0F, 0x00),
                ChannelLayout::FourZero => (0x07, 0x01),
                ChannelLayout::FiveOneSide => (0x0F, 0x06),
                ChannelLayout::SevenOne => (0x3F, 0x06),
                ChannelLayout::FiveOneRear => (0x3F, 0x00),
            }
        }
    }

    /// Looks up the layout for a raw mask pair. Unknown masks (including the
    /// documented `(0x00, 0x00)` "no layout" case) default to stereo, with
    /// the caller responsible for logging the warning.
    pub fn layout_for_mask(mask: (u8, u8)) -> ChannelLayout {
        match mask {
            (0x00, 0x00) => ChannelLayout::Stereo,
            (0x04, 0x00) => ChannelLayout::Mono,
            (0x03, 0x00) => ChannelLayout::Stereo,
            (0x33, 0x00) => ChannelLayout::Quad,
            (0x34, 0x01) => ChannelLayout::Surround,
            (0x0F, 0x00) => ChannelLayout::ThreeOne,
            (0x07, 0x01) => ChannelLayout::FourZero,
            (0x0F, 0x06) => ChannelLayout::FiveOneSide,
            (0x3F, 0x06) => ChannelLayout::SevenOne,
            (0x3F, 0x00) => ChannelLayout::FiveOneRear,
            _ => ChannelLayout::Stereo,
        }
    }

    pub fn is_known_mask(mask: (u8, u8)) -> bool {
        !matches!(
            layout_for_mask(mask),
            ChannelLayout::Stereo if mask != (0x03, 0x00) && mask != (0x00, 0x00)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_round_trip_s16() {
        let mut buf = [0u8; 2];
        SampleFormat::S16.write_sample(0.5, &mut buf);
        let back = SampleFormat::S16.read_sample(&buf);
        assert!((back - 0.5).abs() < 0.001);
    }

    #[test]
    fn sample_round_trip_s24() {
        let mut buf = [0u8; 3];
        SampleFormat::S24.write_sample(-0.25, &mut buf);
        let back = SampleFormat::S24.read_sample(&buf);
        assert!((back + 0.25).abs() < 0.001);
    }

    #[test]
    fn unknown_mask_defaults_to_stereo() {
        assert_eq!(
            channel_mask::layout_for_mask((0xAA, 0xAA)).name(),
            "stereo"
        );
    }

    #[test]
    fn five_one_side_and_rear_are_distinct() {
        assert_eq!(
            channel_mask::layout_for_mask((0x0F, 0x06)).name(),
            "5.1(side)"
        );
        assert_eq!(
            channel_mask::layout_for_mask((0x3F, 0x00)).name(),
            "5.1"
        );
    }

    #[test]
    fn frame_duration_round_trip() {
        let d = Duration::from_millis(24);
        let f = duration_to_frames(d, 48_000);
        assert!((f - 1152.0).abs() < 1.0);
    }
}
