//! RTP receiver: sequence-number continuity tracking and detection of
//! out-of-order packets at the RTP layer. Playout scheduling itself is
//! delegated to the timeshift buffer's per-tag anchor
//! ([`TimeshiftStore::push_arrived`]), the same mechanism every other
//! protocol receiver uses, so eviction and catch-up behave identically
//! across protocols rather than RTP running its own calibration.

use crate::clock::PlayoutClock;
use crate::config::{EngineConfig, RtpConfig};
use crate::error::ReceiverError;
use crate::formats::{AudioFormat, FrameFormat, SampleFormat};
use crate::frame::PcmChunk;
use crate::receiver::{report_malformed_packet, report_wrong_sender, ReceiverApiMessage};
use crate::tag::SourceTag;
use crate::timeshift::TimeshiftStore;
use dashmap::DashMap;
use rtp_rs::RtpReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument, warn};

/// Per-SSRC session state used for RTP-layer continuity checks only; the
/// timeshift anchor (not this struct) owns playout scheduling.
struct SessionState {
    last_seq: u16,
    last_timestamp: u32,
}

/// Maps an inbound SSRC to the source tag and audio format negotiated for
/// it out-of-band (via SDP, discovered through SAP announcements).
pub struct RtpSessionRegistry {
    sessions: DashMap<u32, (SourceTag, AudioFormat)>,
}

impl RtpSessionRegistry {
    pub fn new() -> Self {
        RtpSessionRegistry {
            sessions: DashMap::new(),
        }
    }

    pub fn register(&self, ssrc: u32, tag: SourceTag, format: AudioFormat) {
        self.sessions.insert(ssrc, (tag, format));
    }

    pub fn lookup(&self, ssrc: u32) -> Option<(SourceTag, AudioFormat)> {
        self.sessions.get(&ssrc).map(|e| e.value().clone())
    }
}

impl Default for RtpSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[instrument(skip(subsys, store, config, registry))]
pub async fn run(
    subsys: SubsystemHandle,
    config: Arc<EngineConfig>,
    store: Arc<TimeshiftStore>,
    registry: Arc<RtpSessionRegistry>,
    clock: PlayoutClock,
    mut api_rx: mpsc::Receiver<ReceiverApiMessage>,
) -> Result<(), ReceiverError> {
    let addr: SocketAddr = (config.socket.bind_addr, config.ports.rtp).into();
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| ReceiverError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "rtp receiver listening");

    let sessions: DashMap<u32, SessionState> = DashMap::new();
    let mut buf = [0u8; 65_536];
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => return Ok(()),
            msg = api_rx.recv() => {
                match msg {
                    Some(ReceiverApiMessage::Stop) | None => return Ok(()),
                }
            }
            recv = socket.recv_from(&mut buf) => {
                let (len, from) = match recv {
                    Ok(v) => v,
                    Err(err) => {
                        report_malformed_packet("rtp", addr, &err.to_string());
                        continue;
                    }
                };
                handle_packet(&buf[..len], from, &store, &registry, &sessions, &config.rtp, &clock);
            }
        }
    }
}

fn handle_packet(
    bytes: &[u8],
    from: SocketAddr,
    store: &TimeshiftStore,
    registry: &RtpSessionRegistry,
    sessions: &DashMap<u32, SessionState>,
    rtp_config: &RtpConfig,
    clock: &PlayoutClock,
) {
    let reader = match RtpReader::new(bytes) {
        Ok(r) => r,
        Err(_) => {
            report_malformed_packet("rtp", from, "failed to parse rtp header");
            return;
        }
    };
    let ssrc = reader.ssrc();
    let Some((tag, format)) = registry.lookup(ssrc) else {
        report_wrong_sender("rtp", "<registered ssrc>", from);
        return;
    };

    let seq = reader.sequence_number().into();
    let timestamp = reader.timestamp();
    let payload = reader.payload();

    {
        let mut entry = sessions.entry(ssrc).or_insert_with(|| SessionState {
            last_seq: seq,
            last_timestamp: timestamp,
        });
        let expected_seq = entry.last_seq.wrapping_add(1);
        if seq != expected_seq && seq != entry.last_seq {
            let gap = seq.wrapping_sub(expected_seq);
            if gap > rtp_config.session_reset_threshold as u16 {
                warn!(ssrc, seq, expected_seq, "rtp sequence gap exceeds session reset threshold");
            } else if gap > rtp_config.continuity_slack as u16 {
                warn!(ssrc, seq, expected_seq, "rtp sequence discontinuity");
            } else {
                warn!(ssrc, seq, expected_seq, "out-of-order rtp packet");
            }
        }
        entry.last_seq = seq;
        entry.last_timestamp = timestamp;
    }

    let arrival_instant = clock.now();
    let samples = decode_rtp_payload(payload, format.frame_format.sample_format);
    let chunk = PcmChunk {
        source: tag,
        format,
        samples,
        playout_at: Duration::ZERO,
    };
    store.push_arrived(chunk, arrival_instant, arrival_instant);
}

fn decode_rtp_payload(payload: &[u8], sample_format: SampleFormat) -> Vec<f32> {
    let bytes_per_sample = sample_format.bytes_per_sample();
    payload
        .chunks_exact(bytes_per_sample)
        .map(|c| sample_format.read_sample(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip() {
        let registry = RtpSessionRegistry::new();
        let tag = SourceTag::new("s").unwrap();
        let format = AudioFormat {
            sample_rate: 48_000,
            frame_format: FrameFormat {
                channels: 2,
                sample_format: SampleFormat::S16,
            },
        };
        registry.register(42, tag.clone(), format);
        let (looked_up_tag, looked_up_format) = registry.lookup(42).expect("registered");
        assert_eq!(looked_up_tag, tag);
        assert_eq!(looked_up_format.sample_rate, 48_000);
    }

    #[test]
    fn unregistered_ssrc_is_rejected() {
        let registry = RtpSessionRegistry::new();
        assert!(registry.lookup(1).is_none());
    }
}
