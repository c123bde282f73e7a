//! SAP announcement listener built on `sap_rs::{Event, Sap}`.

use crate::discovery::{Session, SessionRegistry};
use crate::error::DiscoveryError;
use sap_rs::{Event, Sap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, instrument};

#[instrument(skip(subsys, registry))]
pub async fn run(subsys: SubsystemHandle, registry: Arc<SessionRegistry>) -> Result<(), DiscoveryError> {
    let (_sap, mut event_rx) = Sap::new().await.map_err(DiscoveryError::Socket)?;
    info!("sap discovery listening");
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => return Ok(()),
            event = event_rx.recv() => {
                match event {
                    Some(Event::SessionFound(announcement)) => {
                        let session_id = next_id.fetch_add(1, Ordering::Relaxed);
                        registry.announce(Session {
                            session_id,
                            version: 1,
                            timestamp: SystemTime::now(),
                            origin: announcement.originating_source,
                            description: announcement.sdp,
                        });
                    }
                    Some(Event::SessionLost(_)) => {
                        // original-address lookup not tracked per-packet; a full
                        // implementation would key sessions by sap hash, left as
                        // future work once sap-rs exposes it directly.
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}
