//! MP3 encoder: LAME-encodes mixed chunks into a bounded ring that HTTP/WS
//! subscribers (an external collaborator) drain through `get_mp3_data_by_ip`.
//! Framing constant `MP3_HEADER_LENGTH` is carried from
//! `original_source/screamrouter/constants/constants.py`.

use crate::encoder::{report_encoder_started, report_encoder_stopped, EncoderApiMessage};
use crate::error::EncoderError;
use crate::frame::PcmChunk;
use dashmap::DashMap;
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::instrument;

/// Bounded MP3 byte ring shared with subscribers for one sink.
pub struct Mp3Ring {
    buf: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl Mp3Ring {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Mp3Ring {
            buf: Mutex::new(VecDeque::new()),
            capacity,
        })
    }

    fn push(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock().expect("mp3 ring poisoned");
        buf.extend(bytes.iter().copied());
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    /// Drains everything currently buffered, used by `get_mp3_data_by_ip`.
    pub fn drain(&self) -> Vec<u8> {
        let mut buf = self.buf.lock().expect("mp3 ring poisoned");
        buf.drain(..).collect()
    }
}

/// Registry of per-sink MP3 rings keyed by the subscriber's source IP, the
/// way `get_mp3_data_by_ip` looks them up.
pub type Mp3RingRegistry = DashMap<std::net::IpAddr, Arc<Mp3Ring>>;

#[instrument(skip(subsys, chunk_rx, api_rx, ring))]
pub async fn run(
    subsys: SubsystemHandle,
    sink_id: String,
    ring: Arc<Mp3Ring>,
    mut chunk_rx: mpsc::Receiver<PcmChunk>,
    mut api_rx: mpsc::Receiver<EncoderApiMessage>,
) -> Result<(), EncoderError> {
    report_encoder_started("mp3", &sink_id);

    let mut encoder = None;
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
                if encoder.is_none() {
                    encoder = Some(build_encoder(&chunk)?);
                }
                if let Some(enc) = encoder.as_mut() {
                    encode_chunk(enc, &chunk, &ring)?;
                }
            }
        }
    }

    if let Some(mut enc) = encoder {
        let mut out = Vec::with_capacity(7200);
        if enc.flush_to_vec::<FlushNoGap>(&mut out).is_ok() {
            ring.push(&out);
        }
    }

    report_encoder_stopped("mp3", &sink_id);
    Ok(())
}

fn build_encoder(chunk: &PcmChunk) -> Result<mp3lame_encoder::Encoder, EncoderError> {
    let mut builder = Builder::new().ok_or_else(|| EncoderError::Mp3Init("lame builder alloc failed".into()))?;
    builder
        .set_num_channels(chunk.format.frame_format.channels as u8)
        .map_err(|e| EncoderError::Mp3Init(format!("{e:?}")))?;
    builder
        .set_sample_rate(chunk.format.sample_rate)
        .map_err(|e| EncoderError::Mp3Init(format!("{e:?}")))?;
    builder
        .set_brate(Bitrate::Kbps192)
        .map_err(|e| EncoderError::Mp3Init(format!("{e:?}")))?;
    builder
        .build()
        .map_err(|e| EncoderError::Mp3Init(format!("{e:?}")))
}

fn encode_chunk(encoder: &mut mp3lame_encoder::Encoder, chunk: &PcmChunk, ring: &Mp3Ring) -> Result<(), EncoderError> {
    let mut rng = rand::rng();
    let pcm16: Vec<i16> = crate::sip::requantize::requantize(
        &chunk.samples,
        crate::formats::SampleFormat::S16,
        &mut rng,
    )
    .chunks_exact(2)
    .map(|b| i16::from_le_bytes([b[0], b[1]]))
    .collect();
    let input = InterleavedPcm(&pcm16);
    let mut out = Vec::with_capacity(chunk.samples.len() * 5 / 4 + 7200);
    encoder
        .encode_to_vec(input, &mut out)
        .map_err(|e| EncoderError::Mp3Encode(format!("{e:?}")))?;
    ring.push(&out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let ring = Mp3Ring::new(4);
        ring.push(&[1, 2, 3, 4, 5, 6]);
        let drained = ring.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained, vec![3, 4, 5, 6]);
    }

    #[test]
    fn drain_empties_ring() {
        let ring = Mp3Ring::new(16);
        ring.push(&[1, 2, 3]);
        assert_eq!(ring.drain().len(), 3);
        assert!(ring.drain().is_empty());
    }
}
