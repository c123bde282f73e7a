//! External API surface: the operator- and control-plane-facing
//! operations an external management layer calls against a running
//! [`Engine`], exposed as plain async methods on a handle rather than a
//! network RPC layer — transport (HTTP/WebSocket/gRPC) is an external
//! collaborator outside this crate's scope.

use crate::applier::DesiredConfig;
use crate::discovery::{Session, SessionRegistry};
use crate::encoder::mp3::Mp3RingRegistry;
use crate::encoder::system_audio::{list_system_devices, SystemDevice};
use crate::encoder::webrtc::{ListenerState, WebRtcListener};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::frame::PcmChunk;
use crate::stats::{ReceiverStats, RouteStats, SinkStats};
use crate::tag::SourceTag;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

pub struct EngineApi {
    engine: Arc<Engine>,
    sap_registry: Arc<SessionRegistry>,
    mp3_rings: Arc<Mp3RingRegistry>,
    webrtc_listeners: Arc<DashMap<String, Arc<WebRtcListener>>>,
}

impl EngineApi {
    pub fn new(engine: Arc<Engine>, sap_registry: Arc<SessionRegistry>, mp3_rings: Arc<Mp3RingRegistry>) -> Self {
        EngineApi {
            engine,
            sap_registry,
            mp3_rings,
            webrtc_listeners: Arc::new(DashMap::new()),
        }
    }

    pub async fn apply_config(&self, desired: DesiredConfig) -> Result<(), EngineError> {
        self.engine.apply(desired).await.map(|_| ())
    }

    pub fn get_audio_engine_stats(
        &self,
    ) -> (Vec<(String, ReceiverStats)>, Vec<(String, RouteStats)>, Vec<(String, SinkStats)>) {
        (
            self.engine.stats.all_receivers(),
            self.engine.stats.all_routes(),
            self.engine.stats.all_sinks(),
        )
    }

    pub fn list_system_devices(&self) -> Vec<SystemDevice> {
        list_system_devices()
    }

    pub fn get_rtp_sap_announcements(&self) -> Vec<Session> {
        self.sap_registry.snapshot()
    }

    pub fn export_timeshift_buffer(&self, tag: &SourceTag) -> Result<Vec<PcmChunk>, EngineError> {
        Ok(self.engine.timeshift.export(tag)?)
    }

    pub fn get_rtp_receiver_seen_tags(&self) -> Vec<SourceTag> {
        self.engine.timeshift.known_tags()
    }

    pub fn get_mp3_data_by_ip(&self, ip: IpAddr) -> Vec<u8> {
        self.mp3_rings
            .get(&ip)
            .map(|ring| ring.drain())
            .unwrap_or_default()
    }

    pub async fn add_webrtc_listener(&self, listener_id: String) -> Result<(), EngineError> {
        let listener = Arc::new(
            WebRtcListener::new()
                .await
                .map_err(EngineError::from)?,
        );
        self.webrtc_listeners.insert(listener_id, listener);
        Ok(())
    }

    pub async fn remove_webrtc_listener(&self, listener_id: &str) -> Result<(), EngineError> {
        if let Some((_, listener)) = self.webrtc_listeners.remove(listener_id) {
            listener.close().await.map_err(EngineError::from)?;
        }
        Ok(())
    }

    pub fn webrtc_listener_state(&self, listener_id: &str) -> Option<ListenerState> {
        self.webrtc_listeners.get(listener_id).map(|l| l.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn mp3_lookup_for_unknown_ip_is_empty() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let api = EngineApi::new(engine, Arc::new(SessionRegistry::new()), Arc::new(Mp3RingRegistry::default()));
        let data = api.get_mp3_data_by_ip("127.0.0.1".parse().unwrap());
        assert!(data.is_empty());
    }
}
