//! SAP/SDP session discovery: a `Session`
//! type wrapping a parsed SDP description, held in an in-process `dashmap`
//! registry like the rest of this crate's connection-keyed state.

pub mod sap;

use dashmap::DashMap;
use sdp::SessionDescription;
use std::cmp::Ordering;
use std::time::SystemTime;

/// One SAP-announced RTP session, ordered by `(session_id, version)` so the
/// discovery registry only replaces an entry with a strictly newer one.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: u64,
    pub version: u64,
    pub timestamp: SystemTime,
    pub origin: std::net::IpAddr,
    pub description: SessionDescription,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id && self.version == other.version
    }
}
impl Eq for Session {}

impl PartialOrd for Session {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Session {
    fn cmp(&self, other: &Self) -> Ordering {
        self.session_id
            .cmp(&other.session_id)
            .then(self.version.cmp(&other.version))
            .then(self.timestamp.cmp(&other.timestamp))
    }
}

/// Registry of currently-announced SAP sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
        }
    }

    /// Inserts or replaces a session, but only if it's newer than whatever
    /// is already registered under the same id.
    pub fn announce(&self, session: Session) {
        self.sessions
            .entry(session.session_id)
            .and_modify(|existing| {
                if session > *existing {
                    *existing = session.clone();
                }
            })
            .or_insert(session);
    }

    pub fn withdraw(&self, session_id: u64) {
        self.sessions.remove(&session_id);
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(id: u64, version: u64) -> Session {
        Session {
            session_id: id,
            version,
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(version),
            origin: "127.0.0.1".parse().unwrap(),
            description: SessionDescription::default(),
        }
    }

    #[test]
    fn newer_version_replaces_older() {
        let registry = SessionRegistry::new();
        registry.announce(session(1, 1));
        registry.announce(session(1, 2));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].version, 2);
    }

    #[test]
    fn older_version_does_not_replace_newer() {
        let registry = SessionRegistry::new();
        registry.announce(session(1, 5));
        registry.announce(session(1, 2));
        assert_eq!(registry.snapshot()[0].version, 5);
    }

    #[test]
    fn withdraw_removes_session() {
        let registry = SessionRegistry::new();
        registry.announce(session(1, 1));
        registry.withdraw(1);
        assert!(registry.snapshot().is_empty());
    }
}
