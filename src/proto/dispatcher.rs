//! Message dispatcher.
//!
//! Routes each decoded envelope to the handler registered for its type.
//! Before routing, the dispatcher validates the sender id and refreshes the
//! peer table's `last_seen_ms` for known senders, so any valid inbound frame
//! counts as liveness evidence.
//!
//! Handlers run inline on the connection's read task; they are required to be
//! bounded (state merges and queue enqueues only, no I/O waits). Handler
//! errors that carry a wire kind are answered with an ERROR envelope on the
//! same session; everything else is logged and dropped.

use crate::core::error::{HubError, HubResult};
use crate::core::time::now_ms;
use crate::membership::PeerTable;
use crate::proto::framing::encode_frame;
use crate::proto::message::{Envelope, MessageType};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One inbound connection, as seen by handlers.
///
/// Replies are queued to the connection's writer task; a handler never
/// blocks on the socket itself.
pub struct Session {
    remote_addr: SocketAddr,
    max_frame_size: usize,
    reply_tx: mpsc::UnboundedSender<Bytes>,
}

impl Session {
    /// Bind a session to a connection's reply channel.
    pub fn new(
        remote_addr: SocketAddr,
        max_frame_size: usize,
        reply_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            remote_addr,
            max_frame_size,
            reply_tx,
        }
    }

    /// The remote end of this connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue an envelope for transmission on this connection.
    pub fn reply(&self, envelope: &Envelope) -> HubResult<()> {
        let frame = encode_frame(envelope, self.max_frame_size)?;
        self.reply_tx
            .send(frame)
            .map_err(|_| HubError::SendFailed {
                peer_id: self.remote_addr.to_string(),
                detail: "session writer closed".to_string(),
            })
    }
}

/// A registered message handler.
pub trait MessageHandler: Send + Sync {
    /// Process one envelope. Must complete in bounded time.
    fn handle(&self, envelope: &Envelope, session: &Session) -> HubResult<()>;
}

/// MessageType -> handler registry.
pub struct Dispatcher {
    node_id: String,
    peers: Arc<PeerTable>,
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Create an empty dispatcher for this node.
    pub fn new(node_id: impl Into<String>, peers: Arc<PeerTable>) -> Self {
        Self {
            node_id: node_id.into(),
            peers,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler; double registration is a wiring bug.
    pub fn register(
        &mut self,
        msg_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> HubResult<()> {
        if self.handlers.contains_key(&msg_type) {
            return Err(HubError::internal(format!(
                "handler already registered for {msg_type}"
            )));
        }
        self.handlers.insert(msg_type, handler);
        Ok(())
    }

    /// Route one decoded envelope.
    pub fn dispatch(&self, envelope: &Envelope, session: &Session) {
        if envelope.sender_id.is_empty() {
            tracing::warn!(
                remote = %session.remote_addr(),
                msg_type = %envelope.msg_type,
                "dropping envelope with empty sender_id"
            );
            self.reply_error(
                session,
                &HubError::schema(envelope.msg_type.as_str(), "empty sender_id"),
            );
            return;
        }

        // Any valid frame from a known peer refreshes its liveness.
        self.peers.touch(&envelope.sender_id, now_ms());

        let handler = match self.handlers.get(&envelope.msg_type) {
            Some(h) => Arc::clone(h),
            None => {
                let err = HubError::UnknownType {
                    type_name: envelope.msg_type.as_str().to_string(),
                };
                tracing::warn!(
                    sender = %envelope.sender_id,
                    msg_type = %envelope.msg_type,
                    "no handler registered"
                );
                self.reply_error(session, &err);
                return;
            }
        };

        if let Err(err) = handler.handle(envelope, session) {
            if err.replies_on_wire() {
                tracing::debug!(
                    sender = %envelope.sender_id,
                    msg_type = %envelope.msg_type,
                    kind = err.kind(),
                    error = %err,
                    "handler rejected envelope"
                );
                self.reply_error(session, &err);
            } else {
                tracing::warn!(
                    sender = %envelope.sender_id,
                    msg_type = %envelope.msg_type,
                    kind = err.kind(),
                    error = %err,
                    "handler failed"
                );
            }
        }
    }

    fn reply_error(&self, session: &Session, err: &HubError) {
        let reply = Envelope::error(&self.node_id, err.kind(), &err.to_string());
        if let Err(send_err) = session.reply(&reply) {
            tracing::debug!(remote = %session.remote_addr(), error = %send_err, "error reply not delivered");
        }
    }

    /// Types with a registered handler, for wiring assertions in tests.
    pub fn registered_types(&self) -> Vec<MessageType> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::framing::{DecodeOutcome, FrameDecoder};
    use bytes::BytesMut;
    use parking_lot::Mutex;

    struct RecordingHandler {
        seen: Mutex<Vec<Envelope>>,
    }

    impl MessageHandler for RecordingHandler {
        fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
            self.seen.lock().push(envelope.clone());
            Ok(())
        }
    }

    struct RejectingHandler;

    impl MessageHandler for RejectingHandler {
        fn handle(&self, envelope: &Envelope, _session: &Session) -> HubResult<()> {
            Err(HubError::NotImplemented {
                operation: envelope.msg_type.as_str().to_string(),
            })
        }
    }

    fn session() -> (Session, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new("127.0.0.1:9999".parse().unwrap(), 1024 * 1024, tx);
        (session, rx)
    }

    fn decode_reply(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Envelope {
        let frame = rx.try_recv().expect("expected a queued reply");
        let mut buffer = BytesMut::from(&frame[..]);
        match FrameDecoder::new(1024 * 1024).decode(&mut buffer) {
            DecodeOutcome::Complete(env) => env,
            other => panic!("reply did not decode: {other:?}"),
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new("self", Arc::new(PeerTable::new("self")))
    }

    #[test]
    fn test_dispatch_routes_to_registered_handler() {
        let mut d = dispatcher();
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        d.register(MessageType::Ping, handler.clone()).unwrap();

        let (session, mut rx) = session();
        d.dispatch(&Envelope::ping("n2"), &session);

        assert_eq!(handler.seen.lock().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_double_registration_fails() {
        let mut d = dispatcher();
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        d.register(MessageType::Ping, handler.clone()).unwrap();
        assert!(d.register(MessageType::Ping, handler).is_err());
    }

    #[test]
    fn test_unregistered_type_gets_error_reply() {
        let d = dispatcher();
        let (session, mut rx) = session();
        d.dispatch(&Envelope::ping("n2"), &session);

        let reply = decode_reply(&mut rx);
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(reply.sender_id, "self");
        assert_eq!(reply.payload["kind"], "unknown_type");
    }

    #[test]
    fn test_empty_sender_gets_error_and_no_routing() {
        let mut d = dispatcher();
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        d.register(MessageType::Ping, handler.clone()).unwrap();

        let (session, mut rx) = session();
        let mut env = Envelope::ping("n2");
        env.sender_id = String::new();
        d.dispatch(&env, &session);

        assert!(handler.seen.lock().is_empty());
        let reply = decode_reply(&mut rx);
        assert_eq!(reply.payload["kind"], "schema_mismatch");
    }

    #[test]
    fn test_not_implemented_reply_keeps_kind() {
        let mut d = dispatcher();
        d.register(MessageType::GossipState, Arc::new(RejectingHandler))
            .unwrap();

        let (session, mut rx) = session();
        d.dispatch(
            &Envelope::new(MessageType::GossipState, "n2", serde_json::json!({})),
            &session,
        );

        let reply = decode_reply(&mut rx);
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(reply.payload["kind"], "not_implemented");
    }

    #[test]
    fn test_dispatch_touches_known_peer() {
        let peers = Arc::new(PeerTable::new("self"));
        peers.add(crate::membership::Peer::with_last_seen(
            "n2", "10.0.0.2", 7000, 1,
        ));
        let mut d = Dispatcher::new("self", peers.clone());
        d.register(
            MessageType::Ping,
            Arc::new(RecordingHandler {
                seen: Mutex::new(Vec::new()),
            }),
        )
        .unwrap();

        let (session, _rx) = session();
        d.dispatch(&Envelope::ping("n2"), &session);

        let peer = peers.get("n2").unwrap();
        assert!(peer.last_seen_ms > 1);
    }
}
