//! Per-process Scream receiver: identical wire header to raw Scream, but
//! each packet additionally carries a fixed-width, NUL-padded source tag
//! identifying which process on the sending host produced it (the
//! `SCREAM_PER_PROCESS_RECEIVER_PORT` stream in the original).

use crate::clock::PlayoutClock;
use crate::config::{EngineConfig, SCREAM_HEADER_SIZE};
use crate::error::ReceiverError;
use crate::formats::TAG_MAX_LEN;
use crate::frame::PcmChunk;
use crate::receiver::scream::{decode_payload, ScreamHeader};
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

const TAG_FIELD_LEN: usize = TAG_MAX_LEN;
const MIN_PACKET_LEN: usize = SCREAM_HEADER_SIZE + TAG_FIELD_LEN;

#[instrument(skip(subsys, store, config))]
pub async fn run(
    subsys: SubsystemHandle,
    config: Arc<EngineConfig>,
    store: Arc<TimeshiftStore>,
    clock: PlayoutClock,
    mut api_rx: mpsc::Receiver<ReceiverApiMessage>,
) -> Result<(), ReceiverError> {
    let addr: SocketAddr = (config.socket.bind_addr, config.ports.scream_per_process).into();
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| ReceiverError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "per-process scream receiver listening");

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
                        report_malformed_packet("per_process_scream", addr, &err.to_string());
                        continue;
                    }
                };
                handle_packet(&buf[..len], from, &store, &clock);
            }
        }
    }
}

fn handle_packet(bytes: &[u8], from: SocketAddr, store: &TimeshiftStore, clock: &PlayoutClock) {
    if bytes.len() < MIN_PACKET_LEN {
        report_malformed_packet(
            "per_process_scream",
            from,
            &format!("packet too short: {} bytes", bytes.len()),
        );
        return;
    }
    let (header, rest) = match ScreamHeader::parse(bytes) {
        Ok(v) => v,
        Err(err) => {
            report_malformed_packet("per_process_scream", from, &err.to_string());
            return;
        }
    };
    let (tag_bytes, payload) = rest.split_at(TAG_FIELD_LEN);
    let tag = match SourceTag::from_padded_bytes(tag_bytes) {
        Ok(tag) => tag,
        Err(err) => {
            report_malformed_packet("per_process_scream", from, &err.to_string());
            return;
        }
    };
    let samples = decode_payload(&header, payload);
    let arrival_instant = clock.now();
    let chunk = PcmChunk {
        source: tag,
        format: header.audio_format(),
        samples,
        playout_at: Duration::ZERO,
    };
    store.push_arrived(chunk, arrival_instant, arrival_instant);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_header_tag_and_payload() {
        let mut packet = vec![0x80 | 1, 16, 2, 0x03, 0x00];
        let mut tag_field = [0u8; TAG_FIELD_LEN];
        tag_field[..4].copy_from_slice(b"abcd");
        packet.extend_from_slice(&tag_field);
        packet.extend_from_slice(&[0u8; 8]);
        let store = TimeshiftStore::with_window(Duration::from_secs(1));
        handle_packet(&packet, "127.0.0.1:1".parse().unwrap(), &store, &PlayoutClock::new());
    }

    #[test]
    fn rejects_packet_without_full_tag_field() {
        let store = TimeshiftStore::with_window(Duration::from_secs(1));
        let packet = vec![0x80 | 1, 16, 2, 0x03, 0x00, 1, 2, 3];
        handle_packet(&packet, "127.0.0.1:1".parse().unwrap(), &store, &PlayoutClock::new());
        assert!(store.known_tags().is_empty());
    }
}
