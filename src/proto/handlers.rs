//! Protocol message handlers and registry wiring.
//!
//! Membership handlers live in [`crate::membership::handlers`]; this module
//! carries the rest: PING/PONG liveness stubs, SENSOR_UPDATE ingestion into
//! the state engine, passive ACK/ERROR sinks, and the reserved types that
//! deliberately answer ERROR `not_implemented`.

use crate::core::error::{HubError, HubResult};
use crate::membership::handlers::{JoinRequestHandler, PeerListHandler, SelfIdentity};
use crate::membership::PeerTable;
use crate::net::OutboundClient;
use crate::proto::dispatcher::{Dispatcher, MessageHandler, Session};
use crate::proto::message::{Envelope, ErrorPayload, MessageType, SensorUpdatePayload};
use crate::state::StateEngine;
use std::sync::Arc;

/// Answers PING with PONG on the same session.
pub struct PingHandler {
    node_id: String,
}

impl MessageHandler for PingHandler {
    fn handle(&self, _envelope: &Envelope, session: &Session) -> HubResult<()> {
        session.reply(&Envelope::pong(&self.node_id))
    }
}

/// PONG sink; receipt already refreshed the sender's liveness.
pub struct PongHandler;

impl MessageHandler for PongHandler {
    fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
        tracing::debug!(peer = %envelope.sender_id, "pong received");
        Ok(())
    }
}

/// Merges replicated readings into the state engine.
///
/// Entries go through [`StateEngine::apply_remote`], so accepted updates are
/// visible to the HTTP API but never re-enter this node's replication
/// stream.
pub struct SensorUpdateHandler {
    engine: Arc<StateEngine>,
}

impl MessageHandler for SensorUpdateHandler {
    fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
        let payload: SensorUpdatePayload = envelope.payload_as()?;
        let total = payload.updates.len();
        let mut applied = 0usize;
        for entry in payload.updates {
            if self.engine.apply_remote(entry) {
                applied += 1;
            }
        }
        tracing::debug!(
            from = %envelope.sender_id,
            applied,
            total,
            "sensor updates merged"
        );
        Ok(())
    }
}

/// ACK sink (reserved).
pub struct AckHandler;

impl MessageHandler for AckHandler {
    fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
        tracing::debug!(peer = %envelope.sender_id, "ack received");
        Ok(())
    }
}

/// Logs ERROR envelopes from peers; never replies, to avoid error loops.
pub struct ErrorHandler;

impl MessageHandler for ErrorHandler {
    fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
        match envelope.payload_as::<ErrorPayload>() {
            Ok(payload) => tracing::warn!(
                peer = %envelope.sender_id,
                kind = %payload.kind,
                detail = %payload.detail,
                "peer reported an error"
            ),
            Err(_) => tracing::warn!(
                peer = %envelope.sender_id,
                "peer reported an error with an unreadable payload"
            ),
        }
        Ok(())
    }
}

/// Reserved types decode fine but answer ERROR `not_implemented`.
pub struct NotImplementedHandler {
    operation: &'static str,
}

impl MessageHandler for NotImplementedHandler {
    fn handle(&self, _envelope: &Envelope, _session: &Session) -> HubResult<()> {
        Err(HubError::NotImplemented {
            operation: self.operation.to_string(),
        })
    }
}

/// Build a dispatcher with every message type wired.
///
/// The full enum is covered so that any decodable envelope has a registered
/// outcome; only undecodable frames close the connection.
pub fn build_dispatcher(
    identity: SelfIdentity,
    peers: Arc<PeerTable>,
    engine: Arc<StateEngine>,
    outbound: Arc<OutboundClient>,
) -> HubResult<Dispatcher> {
    let mut dispatcher = Dispatcher::new(identity.node_id.clone(), Arc::clone(&peers));

    dispatcher.register(
        MessageType::JoinRequest,
        Arc::new(JoinRequestHandler::new(
            identity.clone(),
            Arc::clone(&peers),
            Arc::clone(&outbound),
        )),
    )?;
    dispatcher.register(
        MessageType::PeerList,
        Arc::new(PeerListHandler::new(
            identity.clone(),
            Arc::clone(&peers),
            Arc::clone(&outbound),
        )),
    )?;

    dispatcher.register(
        MessageType::Ping,
        Arc::new(PingHandler {
            node_id: identity.node_id.clone(),
        }),
    )?;
    dispatcher.register(MessageType::Pong, Arc::new(PongHandler))?;

    dispatcher.register(
        MessageType::SensorUpdate,
        Arc::new(SensorUpdateHandler { engine }),
    )?;

    dispatcher.register(
        MessageType::GossipState,
        Arc::new(NotImplementedHandler {
            operation: "GOSSIP_STATE",
        }),
    )?;
    dispatcher.register(
        MessageType::FullSyncRequest,
        Arc::new(NotImplementedHandler {
            operation: "FULL_SYNC_REQUEST",
        }),
    )?;
    dispatcher.register(
        MessageType::FullSyncResponse,
        Arc::new(NotImplementedHandler {
            operation: "FULL_SYNC_RESPONSE",
        }),
    )?;

    dispatcher.register(MessageType::Ack, Arc::new(AckHandler))?;
    dispatcher.register(MessageType::Error, Arc::new(ErrorHandler))?;

    Ok(dispatcher)
}
