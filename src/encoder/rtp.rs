//! RTP encoder: frames mixed PCM chunks as outgoing RTP packets using
//! `rtp_rs::RtpPacketBuilder`.

use crate::encoder::{report_encoder_started, report_encoder_stopped, EncoderApiMessage};
use crate::error::EncoderError;
use crate::frame::PcmChunk;
use crate::sip::requantize::requantize;
use rand::Rng;
use rtp_rs::RtpPacketBuilder;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::instrument;

const RTP_PAYLOAD_TYPE: u8 = 97;

#[instrument(skip(subsys, chunk_rx, api_rx))]
pub async fn run(
    subsys: SubsystemHandle,
    sink_id: String,
    dest: SocketAddr,
    ssrc: u32,
    mut chunk_rx: mpsc::Receiver<PcmChunk>,
    mut api_rx: mpsc::Receiver<EncoderApiMessage>,
) -> Result<(), EncoderError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(EncoderError::Io)?;
    report_encoder_started("rtp", &sink_id);

    let mut rng = rand::rng();
    let mut sequence: u16 = rng.random();
    let mut timestamp: u32 = rng.random();

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
                let frames = chunk.frames() as u32;
                send_chunk(&socket, dest, &chunk, ssrc, sequence, timestamp, &mut rng).await?;
                sequence = sequence.wrapping_add(1);
                timestamp = timestamp.wrapping_add(frames);
            }
        }
    }
    report_encoder_stopped("rtp", &sink_id);
    Ok(())
}

async fn send_chunk(
    socket: &UdpSocket,
    dest: SocketAddr,
    chunk: &PcmChunk,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    rng: &mut impl Rng,
) -> Result<(), EncoderError> {
    let payload = requantize(&chunk.samples, chunk.format.frame_format.sample_format, rng);
    let packet = RtpPacketBuilder::new()
        .payload_type(RTP_PAYLOAD_TYPE)
        .ssrc(ssrc)
        .sequence(sequence.into())
        .timestamp(timestamp)
        .payload(&payload)
        .build()
        .map_err(|e| EncoderError::Io(std::io::Error::other(format!("{e:?}"))))?;
    socket
        .send_to(&packet, dest)
        .await
        .map_err(EncoderError::Io)?;
    Ok(())
}
