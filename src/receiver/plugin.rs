//! Plugin ingress: unlike the network receivers, a plugin source is
//! an in-process producer (e.g. a local synth or a bridged external
//! process) that already has decoded PCM and just needs a path into the
//! timeshift buffer under its own tag. This is the one receiver with no
//! wire format to parse, so its actor loop only has to apply the same
//! validation and backpressure policy the network receivers get for free
//! from their socket recv loop.

use crate::error::ReceiverError;
use crate::formats::AudioFormat;
use crate::frame::PcmChunk;
use crate::tag::SourceTag;
use crate::timeshift::TimeshiftStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument, warn};

#[derive(Debug)]
pub struct PluginChunk {
    pub format: AudioFormat,
    pub samples: Vec<f32>,
    pub playout_at: Duration,
}

/// Handle a plugin host uses to feed chunks into the engine.
#[derive(Clone)]
pub struct PluginSender {
    tx: mpsc::Sender<PluginChunk>,
}

impl PluginSender {
    pub async fn send(&self, chunk: PluginChunk) -> Result<(), ReceiverError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| ReceiverError::Io(std::io::Error::other("plugin receiver channel closed")))
    }
}

pub fn channel(capacity: usize) -> (PluginSender, mpsc::Receiver<PluginChunk>) {
    let (tx, rx) = mpsc::channel(capacity);
    (PluginSender { tx }, rx)
}

#[instrument(skip(subsys, store, rx))]
pub async fn run(
    subsys: SubsystemHandle,
    store: Arc<TimeshiftStore>,
    source_tag: SourceTag,
    mut rx: mpsc::Receiver<PluginChunk>,
) -> Result<(), ReceiverError> {
    info!(source = %source_tag, "plugin receiver started");
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => return Ok(()),
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { return Ok(()) };
                if chunk.samples.is_empty() {
                    warn!(source = %source_tag, "plugin sent empty chunk, dropping");
                    continue;
                }
                store.push(
                    PcmChunk {
                        source: source_tag.clone(),
                        format: chunk.format,
                        samples: chunk.samples,
                        playout_at: chunk.playout_at,
                    },
                    Duration::ZERO,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{FrameFormat, SampleFormat};

    #[tokio::test]
    async fn sender_delivers_into_channel() {
        let (tx, mut rx) = channel(4);
        tx.send(PluginChunk {
            format: AudioFormat {
                sample_rate: 48_000,
                frame_format: FrameFormat {
                    channels: 2,
                    sample_format: SampleFormat::S16,
                },
            },
            samples: vec![0.0; 4],
            playout_at: Duration::ZERO,
        })
        .await
        .expect("send");
        let received = rx.recv().await.expect("chunk");
        assert_eq!(received.samples.len(), 4);
    }
}
