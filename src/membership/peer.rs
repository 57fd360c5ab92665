//! Peer record.

use crate::core::time::now_ms;
use crate::proto::message::PeerAddr;
use serde::{Deserialize, Serialize};

/// Liveness classification of a peer.
///
/// Only `Alive` is driven today: any valid inbound frame refreshes a peer
/// back to alive. The suspected/dead transitions are reserved for a future
/// phi-accrual failure detector, which is why `phi` is carried in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Alive,
    Suspected,
    Dead,
}

/// One known peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Unique identity; immutable once learned.
    pub node_id: String,

    /// Advertised listen host; may be refreshed by PEER_LIST updates.
    pub host: String,

    /// Advertised listen port.
    pub port: u16,

    /// Wall-clock ms of the last valid inbound frame from this peer.
    pub last_seen_ms: i64,

    /// Accrual failure-detector score (reserved).
    pub phi: f64,

    /// Liveness status.
    pub status: PeerStatus,
}

impl Peer {
    /// A freshly learned peer: alive, seen now, phi zero.
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::with_last_seen(node_id, host, port, now_ms())
    }

    /// Like [`Peer::new`] with an explicit `last_seen_ms`, for tests.
    pub fn with_last_seen(
        node_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        last_seen_ms: i64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            last_seen_ms,
            phi: 0.0,
            status: PeerStatus::Alive,
        }
    }

    /// Wire representation for PEER_LIST payloads.
    pub fn addr(&self) -> PeerAddr {
        PeerAddr {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_peer_defaults() {
        let peer = Peer::new("n2", "10.0.0.2", 7000);
        assert_eq!(peer.status, PeerStatus::Alive);
        assert_eq!(peer.phi, 0.0);
        assert!(peer.last_seen_ms > 0);
    }

    #[test]
    fn test_status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_value(PeerStatus::Suspected).unwrap(),
            serde_json::json!("suspected")
        );
        let peer = Peer::with_last_seen("n2", "h", 1, 5);
        let value = serde_json::to_value(&peer).unwrap();
        assert_eq!(value["status"], "alive");
        assert_eq!(value["last_seen_ms"], 5);
        assert_eq!(value["phi"], 0.0);
    }
}
