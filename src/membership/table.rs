//! Thread-safe registry of known peers.
//!
//! The table is keyed by node id and never stores this node's own identity.
//! Entries are created on first learn (JOIN_REQUEST or PEER_LIST) and are
//! never removed by the core; address refreshes must not clobber liveness
//! state. Readers copy snapshots out; the lock is held only for O(1) or
//! O(n)-copy operations.

use crate::membership::peer::{Peer, PeerStatus};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Thread-safe peer table.
pub struct PeerTable {
    self_node_id: String,
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerTable {
    /// Create an empty table owned by `self_node_id`.
    pub fn new(self_node_id: impl Into<String>) -> Self {
        Self {
            self_node_id: self_node_id.into(),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// The owning node's identity.
    pub fn self_node_id(&self) -> &str {
        &self.self_node_id
    }

    /// Insert a peer if it is not already present.
    ///
    /// Returns true if the peer was added. Self-insertions and duplicates
    /// return false without side effects.
    pub fn add(&self, peer: Peer) -> bool {
        if peer.node_id == self.self_node_id {
            return false;
        }
        let mut peers = self.peers.lock();
        if peers.contains_key(&peer.node_id) {
            return false;
        }
        peers.insert(peer.node_id.clone(), peer);
        true
    }

    /// Copy of a peer record, if known.
    pub fn get(&self, node_id: &str) -> Option<Peer> {
        self.peers.lock().get(node_id).cloned()
    }

    /// Whether a node id is known.
    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.lock().contains_key(node_id)
    }

    /// Refresh liveness after a valid inbound frame; no-op for unknowns.
    pub fn touch(&self, node_id: &str, ts_ms: i64) {
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.get_mut(node_id) {
            peer.last_seen_ms = peer.last_seen_ms.max(ts_ms);
            peer.status = PeerStatus::Alive;
        }
    }

    /// Update a known peer's advertised address without touching liveness.
    ///
    /// Returns true if the stored address changed.
    pub fn update_address(&self, node_id: &str, host: &str, port: u16) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(node_id) {
            Some(peer) if peer.host != host || peer.port != port => {
                peer.host = host.to_string();
                peer.port = port;
                true
            }
            _ => false,
        }
    }

    /// Whether a peer was seen within `window_ms` of `now_ms`.
    pub fn seen_within(&self, node_id: &str, window_ms: i64, now_ms: i64) -> bool {
        self.peers
            .lock()
            .get(node_id)
            .map(|p| now_ms - p.last_seen_ms <= window_ms)
            .unwrap_or(false)
    }

    /// Snapshot of all known peers.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.lock().values().cloned().collect()
    }

    /// Snapshot of known node ids.
    pub fn node_ids(&self) -> Vec<String> {
        self.peers.lock().keys().cloned().collect()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// True when no peer is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
