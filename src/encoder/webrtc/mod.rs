//! WebRTC listener: one `RTCPeerConnection` per listener, publishing
//! Opus-encoded mixed audio over a `TrackLocalStaticSample`.

pub mod opus;

use crate::encoder::{report_encoder_started, report_encoder_stopped, EncoderApiMessage};
use crate::error::EncoderError;
use crate::frame::PcmChunk;
use opus::OpusEncoder;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Listener connection state: new → offered → connected → closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    New,
    Offered,
    Connected,
    Closed,
}

pub struct WebRtcListener {
    state: Arc<AtomicU8>,
    peer: Arc<webrtc::peer_connection::RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    last_heartbeat: Arc<Mutex<Instant>>,
}

fn state_to_u8(state: ListenerState) -> u8 {
    match state {
        ListenerState::New => 0,
        ListenerState::Offered => 1,
        ListenerState::Connected => 2,
        ListenerState::Closed => 3,
    }
}

fn u8_to_state(v: u8) -> ListenerState {
    match v {
        0 => ListenerState::New,
        1 => ListenerState::Offered,
        2 => ListenerState::Connected,
        _ => ListenerState::Closed,
    }
}

impl WebRtcListener {
    pub async fn new() -> Result<Self, EncoderError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EncoderError::WebRtc(e.to_string()))?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let peer = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| EncoderError::WebRtc(e.to_string()))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "audio-broker".to_owned(),
        ));
        peer.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EncoderError::WebRtc(e.to_string()))?;

        let state = Arc::new(AtomicU8::new(state_to_u8(ListenerState::New)));
        let last_heartbeat = Arc::new(Mutex::new(Instant::now()));
        let state_clone = state.clone();
        let heartbeat_clone = last_heartbeat.clone();
        peer.on_ice_connection_state_change(Box::new(move |ice_state| {
            let new_state = match ice_state {
                webrtc::ice_transport::ice_connection_state::RTCIceConnectionState::Connected => {
                    ListenerState::Connected
                }
                webrtc::ice_transport::ice_connection_state::RTCIceConnectionState::Closed
                | webrtc::ice_transport::ice_connection_state::RTCIceConnectionState::Failed
                | webrtc::ice_transport::ice_connection_state::RTCIceConnectionState::Disconnected => {
                    ListenerState::Closed
                }
                _ => return Box::pin(async {}),
            };
            if new_state == ListenerState::Connected {
                *heartbeat_clone.lock().expect("lock") = Instant::now();
            }
            state_clone.store(state_to_u8(new_state), Ordering::SeqCst);
            Box::pin(async {})
        }));

        Ok(WebRtcListener {
            state,
            peer,
            track,
            last_heartbeat,
        })
    }

    pub fn state(&self) -> ListenerState {
        u8_to_state(self.state.load(Ordering::SeqCst))
    }

    /// Records a client heartbeat, resetting the timeout clock.
    pub fn record_heartbeat(&self) {
        *self.last_heartbeat.lock().expect("lock") = Instant::now();
    }

    /// Transitions `Connected` to `Closed` once `timeout` has elapsed since
    /// the last heartbeat. A no-op in every other state.
    pub fn check_heartbeat_timeout(&self, timeout: Duration) {
        if self.state() != ListenerState::Connected {
            return;
        }
        if self.last_heartbeat.lock().expect("lock").elapsed() > timeout {
            self.state.store(state_to_u8(ListenerState::Closed), Ordering::SeqCst);
        }
    }

    /// Creates the SDP offer the caller hands back to the remote peer,
    /// advancing the listener from `New` to `Offered`.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription, EncoderError> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(|e| EncoderError::WebRtc(e.to_string()))?;
        self.peer
            .set_local_description(offer.clone())
            .await
            .map_err(|e| EncoderError::WebRtc(e.to_string()))?;
        self.state.store(state_to_u8(ListenerState::Offered), Ordering::SeqCst);
        Ok(offer)
    }

    pub async fn set_remote_answer(&self, answer: RTCSessionDescription) -> Result<(), EncoderError> {
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| EncoderError::WebRtc(e.to_string()))
    }

    /// Adds a trickled remote ICE candidate.
    pub async fn add_remote_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), EncoderError> {
        self.peer
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| EncoderError::WebRtc(e.to_string()))
    }

    pub fn on_local_ice_candidate<F>(&self, mut f: F)
    where
        F: FnMut(RTCIceCandidate) + Send + 'static,
    {
        self.peer.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                f(c);
            }
            Box::pin(async {})
        }));
    }

    pub async fn close(&self) -> Result<(), EncoderError> {
        self.state.store(state_to_u8(ListenerState::Closed), Ordering::SeqCst);
        self.peer
            .close()
            .await
            .map_err(|e| EncoderError::WebRtc(e.to_string()))
    }
}

#[instrument(skip(subsys, listener, chunk_rx, api_rx))]
pub async fn run(
    subsys: SubsystemHandle,
    sink_id: String,
    listener: Arc<WebRtcListener>,
    format: crate::formats::AudioFormat,
    heartbeat_timeout: Duration,
    mut chunk_rx: mpsc::Receiver<PcmChunk>,
    mut api_rx: mpsc::Receiver<EncoderApiMessage>,
) -> Result<(), EncoderError> {
    report_encoder_started("webrtc", &sink_id);
    let mut encoder = OpusEncoder::new(format)?;
    let mut heartbeat_check = tokio::time::interval(heartbeat_timeout / 4);

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => break,
            msg = api_rx.recv() => {
                match msg {
                    Some(EncoderApiMessage::Stop) | None => break,
                    Some(EncoderApiMessage::Heartbeat) => listener.record_heartbeat(),
                }
            }
            _ = heartbeat_check.tick() => {
                listener.check_heartbeat_timeout(heartbeat_timeout);
                if listener.state() == ListenerState::Closed {
                    break;
                }
            }
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else { break };
                if listener.state() != ListenerState::Connected {
                    continue;
                }
                match encoder.encode(&chunk.samples) {
                    Ok(payload) => {
                        let sample = webrtc::media::Sample {
                            data: payload.into(),
                            duration: chunk.duration(),
                            ..Default::default()
                        };
                        if let Err(err) = listener.track.write_sample(&sample).await {
                            warn!(?err, "failed to write webrtc sample");
                        }
                    }
                    Err(err) => warn!(?err, "opus encode failed"),
                }
            }
        }
    }

    let _ = listener.close().await;
    report_encoder_stopped("webrtc", &sink_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for s in [
            ListenerState::New,
            ListenerState::Offered,
            ListenerState::Connected,
            ListenerState::Closed,
        ] {
            assert_eq!(u8_to_state(state_to_u8(s)), s);
        }
    }

    #[tokio::test]
    async fn heartbeat_timeout_closes_a_connected_listener() {
        let listener = WebRtcListener::new().await.expect("listener");
        listener.state.store(state_to_u8(ListenerState::Connected), Ordering::SeqCst);
        *listener.last_heartbeat.lock().expect("lock") = Instant::now() - Duration::from_secs(20);
        listener.check_heartbeat_timeout(Duration::from_secs(15));
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn fresh_heartbeat_keeps_listener_connected() {
        let listener = WebRtcListener::new().await.expect("listener");
        listener.state.store(state_to_u8(ListenerState::Connected), Ordering::SeqCst);
        listener.record_heartbeat();
        listener.check_heartbeat_timeout(Duration::from_secs(15));
        assert_eq!(listener.state(), ListenerState::Connected);
    }

    #[tokio::test]
    async fn heartbeat_timeout_ignored_before_connected() {
        let listener = WebRtcListener::new().await.expect("listener");
        *listener.last_heartbeat.lock().expect("lock") = Instant::now() - Duration::from_secs(20);
        listener.check_heartbeat_timeout(Duration::from_secs(15));
        assert_eq!(listener.state(), ListenerState::New);
    }
}
