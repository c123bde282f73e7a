//! Raw Scream receiver: parses the 5-byte Scream header, carried verbatim
//! from `original_source/screamrouter/audio/scream_header_parser.py`'s
//! `ScreamHeader`, and converts each packet's payload into one [`PcmChunk`].

use crate::clock::PlayoutClock;
use crate::config::{EngineConfig, SCREAM_HEADER_SIZE};
use crate::error::ReceiverError;
use crate::formats::{channel_mask, AudioFormat, FrameFormat, SampleFormat};
use crate::frame::PcmChunk;
use crate::receiver::{report_malformed_packet, ReceiverApiMessage};
use crate::tag::SourceTag;
use crate::timeshift::TimeshiftStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument};

/// The decoded 5-byte Scream wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreamHeader {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channels: u8,
    pub mask: (u8, u8),
}

impl ScreamHeader {
    /// Decodes the header byte0: bit7 selects a 44100 (1) or 48000 (0) base
    /// rate, the low 7 bits are a multiplier clamped to a minimum of 1.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), ReceiverError> {
        if bytes.len() < SCREAM_HEADER_SIZE {
            return Err(ReceiverError::MalformedScreamHeader(format!(
                "packet too short: {} bytes",
                bytes.len()
            )));
        }
        let base = if bytes[0] & 0x80 != 0 { 44_100 } else { 48_000 };
        let multiplier = (bytes[0] & 0x7F).max(1) as u32;
        let sample_rate = base * multiplier;

        let bit_depth = bytes[1];
        let sample_format = SampleFormat::from_bit_depth(bit_depth).ok_or_else(|| {
            ReceiverError::MalformedScreamHeader(format!("unsupported bit depth {bit_depth}"))
        })?;

        let channels = bytes[2];
        if channels == 0 {
            return Err(ReceiverError::MalformedScreamHeader(
                "zero channel count".into(),
            ));
        }
        let mask = (bytes[3], bytes[4]);

        Ok((
            ScreamHeader {
                sample_rate,
                sample_format,
                channels,
                mask,
            },
            &bytes[SCREAM_HEADER_SIZE..],
        ))
    }

    /// Encodes a header for the given format, the inverse of [`Self::parse`],
    /// used by the Scream encoder to frame outgoing packets.
    pub fn encode(format: AudioFormat) -> [u8; SCREAM_HEADER_SIZE] {
        let (base_bit, base) = if format.sample_rate % 44_100 == 0 {
            (0x80u8, 44_100u32)
        } else {
            (0x00u8, 48_000u32)
        };
        let multiplier = (format.sample_rate / base).max(1).min(0x7F) as u8;
        let layout = default_layout_for_channels(format.frame_format.channels);
        let (m0, m1) = layout.mask();
        [
            base_bit | multiplier,
            format.frame_format.sample_format.bit_depth(),
            format.frame_format.channels as u8,
            m0,
            m1,
        ]
    }

    pub fn layout(&self) -> channel_mask::ChannelLayout {
        if !channel_mask::is_known_mask(self.mask) {
            tracing::warn!(mask = ?self.mask, "unknown scream channel mask, defaulting to stereo");
        }
        channel_mask::layout_for_mask(self.mask)
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            frame_format: FrameFormat {
                channels: self.channels as usize,
                sample_format: self.sample_format,
            },
        }
    }
}

fn default_layout_for_channels(channels: usize) -> channel_mask::ChannelLayout {
    use channel_mask::ChannelLayout::*;
    match channels {
        1 => Mono,
        2 => Stereo,
        4 => Quad,
        6 => FiveOneSide,
        8 => SevenOne,
        _ => Stereo,
    }
}

/// Decodes the payload of a Scream packet into normalized `f32` samples.
pub fn decode_payload(header: &ScreamHeader, payload: &[u8]) -> Vec<f32> {
    let bytes_per_sample = header.sample_format.bytes_per_sample();
    let mut samples = Vec::with_capacity(payload.len() / bytes_per_sample);
    for chunk in payload.chunks_exact(bytes_per_sample) {
        samples.push(header.sample_format.read_sample(chunk));
    }
    samples
}

/// Runs the raw (non per-process) Scream receiver until shutdown is
/// requested, pushing each decoded packet into `store` under `source_tag`.
#[instrument(skip(subsys, store, config))]
pub async fn run(
    subsys: SubsystemHandle,
    config: Arc<EngineConfig>,
    store: Arc<TimeshiftStore>,
    clock: PlayoutClock,
    source_tag: SourceTag,
    mut api_rx: mpsc::Receiver<ReceiverApiMessage>,
) -> Result<(), ReceiverError> {
    let addr: SocketAddr = (config.socket.bind_addr, config.ports.scream).into();
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| ReceiverError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "raw scream receiver listening");

    let mut buf = [0u8; 65_536];
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                info!("raw scream receiver shutting down");
                return Ok(());
            }
            msg = api_rx.recv() => {
                match msg {
                    Some(ReceiverApiMessage::Stop) | None => return Ok(()),
                }
            }
            recv = socket.recv_from(&mut buf) => {
                let (len, from) = match recv {
                    Ok(v) => v,
                    Err(err) => {
                        report_malformed_packet("scream", addr, &err.to_string());
                        continue;
                    }
                };
                handle_packet(&buf[..len], from, &store, &clock, &source_tag);
            }
        }
    }
}

fn handle_packet(
    bytes: &[u8],
    from: SocketAddr,
    store: &TimeshiftStore,
    clock: &PlayoutClock,
    source_tag: &SourceTag,
) {
    let (header, payload) = match ScreamHeader::parse(bytes) {
        Ok(v) => v,
        Err(err) => {
            report_malformed_packet("scream", from, &err.to_string());
            return;
        }
    };
    let samples = decode_payload(&header, payload);
    let arrival_instant = clock.now();
    let chunk = PcmChunk {
        source: source_tag.clone(),
        format: header.audio_format(),
        samples,
        playout_at: Duration::ZERO,
    };
    store.push_arrived(chunk, arrival_instant, arrival_instant);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(rate_bit: u8, mult: u8, depth: u8, channels: u8, mask: (u8, u8)) -> [u8; 5] {
        [rate_bit << 7 | mult, depth, channels, mask.0, mask.1]
    }

    #[test]
    fn parses_48k_header() {
        let bytes = header_bytes(0, 1, 16, 2, (0x03, 0x00));
        let (header, rest) = ScreamHeader::parse(&bytes).expect("valid header");
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.channels, 2);
        assert!(rest.is_empty());
    }

    #[test]
    fn parses_44k_header_with_multiplier() {
        let bytes = header_bytes(1, 2, 24, 6, (0x0F, 0x06));
        let (header, _) = ScreamHeader::parse(&bytes).expect("valid header");
        assert_eq!(header.sample_rate, 88_200);
        assert_eq!(header.layout().name(), "5.1(side)");
    }

    #[test]
    fn multiplier_zero_clamps_to_one() {
        let bytes = header_bytes(0, 0, 16, 2, (0x03, 0x00));
        let (header, _) = ScreamHeader::parse(&bytes).expect("valid header");
        assert_eq!(header.sample_rate, 48_000);
    }

    #[test]
    fn rejects_short_packet() {
        let bytes = [0u8; 3];
        assert!(ScreamHeader::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_unsupported_bit_depth() {
        let bytes = header_bytes(1, 1, 12, 2, (0x03, 0x00));
        assert!(ScreamHeader::parse(&bytes).is_err());
    }

    #[test]
    fn encode_decode_round_trip_for_every_layout() {
        for channels in [1usize, 2, 4, 6, 8] {
            let format = AudioFormat {
                sample_rate: 48_000,
                frame_format: FrameFormat {
                    channels,
                    sample_format: SampleFormat::S16,
                },
            };
            let encoded = ScreamHeader::encode(format);
            let (decoded, _) = ScreamHeader::parse(&encoded).expect("valid header");
            assert_eq!(decoded.channels as usize, channels);
            assert_eq!(decoded.sample_rate, 48_000);
        }
    }
}
