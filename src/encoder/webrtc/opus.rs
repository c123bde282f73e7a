//! Opus encode step for the WebRTC listener, pairing with the `opus` crate
//! the way the rest of the webrtc-rs ecosystem does.

use crate::error::EncoderError;
use crate::formats::AudioFormat;
use opus::{Application, Channels, Encoder};

pub struct OpusEncoder {
    inner: Encoder,
    channels: usize,
}

impl OpusEncoder {
    pub fn new(format: AudioFormat) -> Result<Self, EncoderError> {
        let channels = match format.frame_format.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(EncoderError::WebRtc(format!("opus only supports mono/stereo, got {n} channels"))),
        };
        let inner = Encoder::new(format.sample_rate, channels, Application::Audio)
            .map_err(|e| EncoderError::WebRtc(format!("opus init failed: {e}")))?;
        Ok(OpusEncoder {
            inner,
            channels: format.frame_format.channels,
        })
    }

    pub fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, EncoderError> {
        let mut out = vec![0u8; 4000];
        let n = self
            .inner
            .encode_float(samples, &mut out)
            .map_err(|e| EncoderError::WebRtc(format!("opus encode failed: {e}")))?;
        out.truncate(n);
        Ok(out)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
