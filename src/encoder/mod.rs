//! Protocol encoders: each sink owns one encoder actor that takes
//! the mixed chunks produced by its [`crate::sam::SinkMixer`] and frames
//! them for one wire or local-device format.

pub mod mp3;
pub mod rtp;
pub mod scream;
pub mod system_audio;
pub mod webrtc;

#[derive(Debug)]
pub enum EncoderApiMessage {
    Stop,
    /// A WebRTC listener's client-side heartbeat; ignored by other protocols.
    Heartbeat,
}

#[derive(Clone)]
pub struct EncoderApi {
    tx: tokio::sync::mpsc::Sender<EncoderApiMessage>,
}

impl EncoderApi {
    pub fn new(tx: tokio::sync::mpsc::Sender<EncoderApiMessage>) -> Self {
        EncoderApi { tx }
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(EncoderApiMessage::Stop).await;
    }

    pub async fn heartbeat(&self) {
        let _ = self.tx.send(EncoderApiMessage::Heartbeat).await;
    }
}

mod monitoring {
    use tracing::info;

    pub fn report_encoder_started(protocol: &str, sink: &str) {
        info!(protocol, sink, "encoder started");
    }

    pub fn report_encoder_stopped(protocol: &str, sink: &str) {
        info!(protocol, sink, "encoder stopped");
    }
}

pub(crate) use monitoring::{report_encoder_started, report_encoder_stopped};
