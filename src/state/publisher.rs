//! Replication publisher.
//!
//! A single periodic loop drains the engine's replication buffer and
//! broadcasts the batch to every peer as one SENSOR_UPDATE envelope. Ticks
//! are drift-free: the interval fires on period boundaries rather than
//! accumulating sleep skew. Per-peer delivery is best-effort; a failed or
//! overflowing peer queue affects no other peer, and a peer that misses a
//! batch converges on a later one because LWW re-broadcasts the newest value
//! per key.

use crate::net::OutboundClient;
use crate::proto::message::Envelope;
use crate::state::StateEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic replication publisher.
pub struct ReplicationPublisher {
    node_id: String,
    engine: Arc<StateEngine>,
    outbound: Arc<OutboundClient>,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReplicationPublisher {
    /// Create a publisher; call [`Self::spawn`] to start the loop.
    pub fn new(
        node_id: impl Into<String>,
        engine: Arc<StateEngine>,
        outbound: Arc<OutboundClient>,
        period: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            engine,
            outbound,
            period,
            shutdown_rx,
        }
    }

    /// Start the periodic loop on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.period);
        // First tick completes immediately; skip it so the loop settles on
        // period boundaries.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => break,
                _ = ticker.tick() => {}
            }
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.publish_once();
        }

        tracing::debug!("replication publisher exiting");
    }

    /// Drain and broadcast one batch. Returns the number of updates sent.
    pub fn publish_once(&self) -> usize {
        let updates = self.engine.drain_replication_updates();
        if updates.is_empty() {
            return 0;
        }

        let count = updates.len();
        let envelope = Envelope::sensor_update(&self.node_id, updates);
        let fanout = self.outbound.broadcast(&envelope);
        tracing::debug!(count, fanout, "replication batch published");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::OutboundConfig;
    use crate::proto::framing::{DecodeOutcome, FrameDecoder};
    use crate::proto::message::{MessageType, SensorUpdatePayload};
    use crate::state::SensorEntry;
    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn entry(key: &str, ts_ms: i64, origin: &str) -> SensorEntry {
        SensorEntry::bare(key, serde_json::json!(1), ts_ms, origin)
    }

    #[tokio::test]
    async fn test_publish_once_empty_is_silent() {
        let engine = Arc::new(StateEngine::new("n1"));
        let (_tx, rx) = watch::channel(false);
        let outbound = Arc::new(OutboundClient::new(OutboundConfig::default(), rx.clone()));
        let publisher = ReplicationPublisher::new(
            "n1",
            engine,
            outbound,
            Duration::from_millis(200),
            rx,
        );

        assert_eq!(publisher.publish_once(), 0);
    }

    #[tokio::test]
    async fn test_publish_once_drains_and_broadcasts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let engine = Arc::new(StateEngine::new("n1"));
        let (_tx, rx) = watch::channel(false);
        let outbound = Arc::new(OutboundClient::new(OutboundConfig::default(), rx.clone()));
        outbound.ensure_worker("n2", "127.0.0.1", port);

        assert!(engine.apply_local(entry("n1:a", 100, "n1")));
        assert!(engine.apply_local(entry("n1:b", 100, "n1")));

        let publisher = ReplicationPublisher::new(
            "n1",
            Arc::clone(&engine),
            outbound,
            Duration::from_millis(200),
            rx,
        );
        assert_eq!(publisher.publish_once(), 2);
        // Buffer is consume-once: a second tick has nothing to send.
        assert_eq!(publisher.publish_once(), 0);

        let (mut stream, _) = listener.accept().await.unwrap();
        let decoder = FrameDecoder::new(1024 * 1024);
        let mut buffer = BytesMut::new();
        let mut chunk = [0u8; 4096];
        let envelope = loop {
            match decoder.decode(&mut buffer) {
                DecodeOutcome::Complete(env) => break env,
                DecodeOutcome::Incomplete => {
                    let n = stream.read(&mut chunk).await.unwrap();
                    assert!(n > 0);
                    buffer.extend_from_slice(&chunk[..n]);
                }
                DecodeOutcome::Invalid(detail) => panic!("invalid frame: {detail}"),
            }
        };

        assert_eq!(envelope.msg_type, MessageType::SensorUpdate);
        let payload: SensorUpdatePayload = envelope.payload_as().unwrap();
        assert_eq!(payload.updates.len(), 2);
    }

    #[tokio::test]
    async fn test_remote_entries_are_never_republished() {
        let engine = Arc::new(StateEngine::new("n1"));
        let (_tx, rx) = watch::channel(false);
        let outbound = Arc::new(OutboundClient::new(OutboundConfig::default(), rx.clone()));

        assert!(engine.apply_remote(entry("n2:t", 100, "n2")));
        let publisher = ReplicationPublisher::new(
            "n1",
            engine,
            outbound,
            Duration::from_millis(200),
            rx,
        );
        assert_eq!(publisher.publish_once(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_publishes_on_period_and_stops_on_shutdown() {
        let engine = Arc::new(StateEngine::new("n1"));
        let (tx, rx) = watch::channel(false);
        let outbound = Arc::new(OutboundClient::new(OutboundConfig::default(), rx.clone()));

        engine.apply_local(entry("n1:t", 100, "n1"));
        let publisher = ReplicationPublisher::new(
            "n1",
            Arc::clone(&engine),
            outbound,
            Duration::from_millis(200),
            rx,
        );
        let handle = publisher.spawn();

        // One period passes: the buffer drains even with zero peers.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(engine.drain_replication_updates().is_empty());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("publisher did not stop")
            .unwrap();
    }
}
