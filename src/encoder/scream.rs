//! Scream encoder: frames mixed PCM chunks with the same 5-byte header the
//! receiver parses and sends them to the configured destination, the
//! inverse of [`crate::receiver::scream`].

use crate::encoder::{report_encoder_started, report_encoder_stopped, EncoderApiMessage};
use crate::error::EncoderError;
use crate::frame::PcmChunk;
use crate::receiver::scream::ScreamHeader;
use crate::sip::requantize::requantize;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::instrument;

#[instrument(skip(subsys, chunk_rx, api_rx))]
pub async fn run(
    subsys: SubsystemHandle,
    sink_id: String,
    dest: SocketAddr,
    mut chunk_rx: mpsc::Receiver<PcmChunk>,
    mut api_rx: mpsc::Receiver<EncoderApiMessage>,
) -> Result<(), EncoderError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(EncoderError::Io)?;
    report_encoder_started("scream", &sink_id);

    let mut rng = rand::rng();
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            msg = api_rx.recv() => {
                match msg {
                    Some(EncoderApiMessage::Stop) | None => break,
                    Some(EncoderApiMessage::Heartbeat) => {}
                }
            }
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else { break };
                send_chunk(&socket, dest, &chunk, &mut rng).await?;
            }
        }
    }
    report_encoder_stopped("scream", &sink_id);
    Ok(())
}

async fn send_chunk(
    socket: &UdpSocket,
    dest: SocketAddr,
    chunk: &PcmChunk,
    rng: &mut impl rand::Rng,
) -> Result<(), EncoderError> {
    let header = ScreamHeader::encode(chunk.format);
    let payload = requantize(&chunk.samples, chunk.format.frame_format.sample_format, rng);
    let mut packet = Vec::with_capacity(header.len() + payload.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&payload);
    socket
        .send_to(&packet, dest)
        .await
        .map_err(EncoderError::Io)?;
    Ok(())
}
