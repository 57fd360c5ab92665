//! Membership message handlers.
//!
//! JOIN_REQUEST and PEER_LIST implement transitive-closure gossip: every
//! pairwise exchange yields the union of both peers' knowledge, so a
//! connected bootstrap graph converges to full membership within its
//! diameter in rounds.
//!
//! Re-join suppression: a JOIN_REQUEST is only enqueued toward peers that
//! are newly learned or whose `last_seen_ms` has gone stale. Without this,
//! dense graphs generate redundant join storms on every PEER_LIST exchange.

use crate::core::error::HubResult;
use crate::core::time::now_ms;
use crate::membership::{Peer, PeerTable};
use crate::net::OutboundClient;
use crate::proto::dispatcher::{MessageHandler, Session};
use crate::proto::message::{Envelope, JoinRequestPayload, PeerAddr, PeerListPayload};
use std::sync::Arc;

/// How recently a peer must have been seen for a re-join to be suppressed.
pub const JOIN_SUPPRESS_WINDOW_MS: i64 = 30_000;

/// This node's advertised identity and listen address, shared by handlers.
#[derive(Debug, Clone)]
pub struct SelfIdentity {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl SelfIdentity {
    /// Wire entry advertising this node in PEER_LIST payloads.
    fn addr(&self) -> PeerAddr {
        PeerAddr {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn join_request(&self) -> Envelope {
        Envelope::join_request(&self.node_id, &self.host, self.port)
    }
}

/// Host to actually dial for a peer.
///
/// A peer that bound to the wildcard address advertises an address other
/// nodes cannot dial; in container networks the service DNS name matches the
/// node id, so fall back to that.
fn connectable_host<'a>(node_id: &'a str, host: &'a str) -> &'a str {
    if host == "0.0.0.0" {
        node_id
    } else {
        host
    }
}

/// Handles JOIN_REQUEST: admit the sender, answer with our full peer view.
pub struct JoinRequestHandler {
    identity: SelfIdentity,
    peers: Arc<PeerTable>,
    outbound: Arc<OutboundClient>,
}

impl JoinRequestHandler {
    pub fn new(
        identity: SelfIdentity,
        peers: Arc<PeerTable>,
        outbound: Arc<OutboundClient>,
    ) -> Self {
        Self {
            identity,
            peers,
            outbound,
        }
    }
}

impl MessageHandler for JoinRequestHandler {
    fn handle(&self, envelope: &Envelope, session: &Session) -> HubResult<()> {
        let payload: JoinRequestPayload = envelope.payload_as()?;
        let sender = envelope.sender_id.as_str();

        // A self-join carries no information.
        if sender == self.identity.node_id {
            return Ok(());
        }

        let added = self
            .peers
            .add(Peer::new(sender, payload.host.clone(), payload.port));
        if added {
            tracing::info!(peer = sender, host = %payload.host, port = payload.port, "peer joined");
            self.outbound.ensure_worker(
                sender,
                connectable_host(sender, &payload.host),
                payload.port,
            );
        } else {
            tracing::debug!(peer = sender, "join from known peer");
            self.peers
                .update_address(sender, &payload.host, payload.port);
        }

        // Reply on the same session with everything we know, ourselves
        // included, so the joiner learns the full neighbourhood in one hop.
        let mut peers: Vec<PeerAddr> = self.peers.snapshot().iter().map(Peer::addr).collect();
        peers.push(self.identity.addr());
        session.reply(&Envelope::peer_list(&self.identity.node_id, peers))
    }
}

/// Handles PEER_LIST: integrate unknown peers and drive transitive joins.
pub struct PeerListHandler {
    identity: SelfIdentity,
    peers: Arc<PeerTable>,
    outbound: Arc<OutboundClient>,
    suppress_window_ms: i64,
}

impl PeerListHandler {
    pub fn new(
        identity: SelfIdentity,
        peers: Arc<PeerTable>,
        outbound: Arc<OutboundClient>,
    ) -> Self {
        Self {
            identity,
            peers,
            outbound,
            suppress_window_ms: JOIN_SUPPRESS_WINDOW_MS,
        }
    }

    /// Override the re-join suppression window (tests).
    pub fn with_suppress_window_ms(mut self, window_ms: i64) -> Self {
        self.suppress_window_ms = window_ms;
        self
    }
}

impl MessageHandler for PeerListHandler {
    fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
        let payload: PeerListPayload = envelope.payload_as()?;
        let now = now_ms();
        let mut integrated = 0usize;

        for entry in payload.peers {
            if entry.node_id == self.identity.node_id {
                continue;
            }

            if self.peers.contains(&entry.node_id) {
                // Known peer: refresh the address, leave liveness alone.
                if self
                    .peers
                    .update_address(&entry.node_id, &entry.host, entry.port)
                {
                    tracing::debug!(peer = %entry.node_id, host = %entry.host, port = entry.port, "peer address refreshed");
                }
                // Quiet peers get re-invited so a one-sided table heals.
                if !self
                    .peers
                    .seen_within(&entry.node_id, self.suppress_window_ms, now)
                {
                    self.enqueue_join(&entry);
                }
                continue;
            }

            if self
                .peers
                .add(Peer::new(&entry.node_id, entry.host.clone(), entry.port))
            {
                integrated += 1;
                self.enqueue_join(&entry);
            }
        }

        if integrated > 0 {
            tracing::info!(
                from = %envelope.sender_id,
                integrated,
                known = self.peers.len(),
                "integrated peers from PEER_LIST"
            );
        }
        Ok(())
    }
}

impl PeerListHandler {
    fn enqueue_join(&self, entry: &PeerAddr) {
        self.outbound.ensure_worker(
            &entry.node_id,
            connectable_host(&entry.node_id, &entry.host),
            entry.port,
        );
        if let Err(e) = self
            .outbound
            .send(&entry.node_id, &self.identity.join_request())
        {
            tracing::warn!(peer = %entry.node_id, error = %e, "transitive JOIN_REQUEST not enqueued");
        }
    }
}
