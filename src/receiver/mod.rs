//! Protocol receivers: one actor per ingress protocol, each parsing
//! its own wire format into tagged [`PcmChunk`]s and pushing them into the
//! shared [`TimeshiftStore`]. Each receiver owns its socket, runs a
//! `select!` loop over control messages and incoming data, and reports
//! through a trailing `mod monitoring` block.

pub mod per_process;
pub mod plugin;
pub mod rtp;
pub mod scream;

use crate::error::ReceiverError;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::instrument;

#[instrument]
pub async fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, ReceiverError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| ReceiverError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Control-plane message sent to a running receiver actor.
#[derive(Debug)]
pub enum ReceiverApiMessage {
    Stop,
}

/// Handle a caller holds to a running receiver actor.
#[derive(Clone)]
pub struct ReceiverApi {
    tx: tokio::sync::mpsc::Sender<ReceiverApiMessage>,
}

impl ReceiverApi {
    pub fn new(tx: tokio::sync::mpsc::Sender<ReceiverApiMessage>) -> Self {
        ReceiverApi { tx }
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(ReceiverApiMessage::Stop).await;
    }
}

mod monitoring {
    //! Shared report helpers used by every receiver's own `mod monitoring`.
    use tracing::warn;

    pub fn report_malformed_packet(protocol: &str, from: std::net::SocketAddr, reason: &str) {
        warn!(protocol, %from, reason, "malformed packet");
    }

    pub fn report_wrong_sender(protocol: &str, expected: &str, got: std::net::SocketAddr) {
        warn!(protocol, expected, %got, "packet from unexpected sender");
    }
}

pub(crate) use monitoring::{report_malformed_packet, report_wrong_sender};
