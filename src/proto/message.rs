//! Wire message envelope and payload schemas.
//!
//! Every inter-node payload is a JSON envelope:
//!
//! ```text
//! { "type": "<MessageType>", "sender_id": "...", "ts_ms": <int64>, "payload": { ... } }
//! ```
//!
//! `ts_ms` is stamped at construction. Payloads are type-specific objects;
//! typed views are extracted on demand with [`Envelope::payload_as`] so that
//! a schema mismatch surfaces as a protocol error instead of a decode error.

use crate::core::error::{HubError, HubResult};
use crate::core::time::now_ms;
use crate::state::SensorEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message categories understood by the cluster.
///
/// GOSSIP_STATE and FULL_SYNC_* are reserved: they decode without error but
/// their handlers answer ERROR `not_implemented`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    JoinRequest,
    PeerList,
    Ping,
    Pong,
    SensorUpdate,
    GossipState,
    FullSyncRequest,
    FullSyncResponse,
    Ack,
    Error,
}

impl MessageType {
    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinRequest => "JOIN_REQUEST",
            Self::PeerList => "PEER_LIST",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::SensorUpdate => "SENSOR_UPDATE",
            Self::GossipState => "GOSSIP_STATE",
            Self::FullSyncRequest => "FULL_SYNC_REQUEST",
            Self::FullSyncResponse => "FULL_SYNC_RESPONSE",
            Self::Ack => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message category.
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    /// Sending node's identity.
    pub sender_id: String,

    /// Milliseconds since the Unix epoch, assigned at send.
    pub ts_ms: i64,

    /// Type-specific payload object.
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Build an envelope stamped with the current wall clock.
    pub fn new(msg_type: MessageType, sender_id: impl Into<String>, payload: Value) -> Self {
        Self {
            msg_type,
            sender_id: sender_id.into(),
            ts_ms: now_ms(),
            payload,
        }
    }

    /// Deserialize the payload into a typed schema.
    pub fn payload_as<T: DeserializeOwned>(&self) -> HubResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| HubError::schema(self.msg_type.as_str(), e.to_string()))
    }

    /// JOIN_REQUEST advertising the sender's listen address.
    pub fn join_request(sender_id: &str, host: &str, port: u16) -> Self {
        Self::new(
            MessageType::JoinRequest,
            sender_id,
            serde_json::json!({ "host": host, "port": port }),
        )
    }

    /// PEER_LIST carrying the sender's full peer view.
    pub fn peer_list(sender_id: &str, peers: Vec<PeerAddr>) -> Self {
        Self::new(
            MessageType::PeerList,
            sender_id,
            serde_json::to_value(PeerListPayload { peers }).unwrap_or_else(|_| empty_object()),
        )
    }

    /// SENSOR_UPDATE batching merged entries for replication.
    pub fn sensor_update(sender_id: &str, updates: Vec<SensorEntry>) -> Self {
        Self::new(
            MessageType::SensorUpdate,
            sender_id,
            serde_json::to_value(SensorUpdatePayload { updates })
                .unwrap_or_else(|_| empty_object()),
        )
    }

    /// PING probe.
    pub fn ping(sender_id: &str) -> Self {
        Self::new(MessageType::Ping, sender_id, empty_object())
    }

    /// PONG answer.
    pub fn pong(sender_id: &str) -> Self {
        Self::new(MessageType::Pong, sender_id, empty_object())
    }

    /// ERROR reply with a stable kind string.
    pub fn error(sender_id: &str, kind: &str, detail: &str) -> Self {
        Self::new(
            MessageType::Error,
            sender_id,
            serde_json::json!({ "kind": kind, "detail": detail }),
        )
    }
}

/// A peer's advertised identity and listen address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

/// JOIN_REQUEST payload: the sender's listen address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestPayload {
    pub host: String,
    pub port: u16,
}

/// PEER_LIST payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerListPayload {
    pub peers: Vec<PeerAddr>,
}

/// SENSOR_UPDATE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdatePayload {
    pub updates: Vec<SensorEntry>,
}

/// ERROR payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub detail: String,
}

/// ACK payload (reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    pub ref_ts_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_names() {
        assert_eq!(
            serde_json::to_value(MessageType::JoinRequest).unwrap(),
            serde_json::json!("JOIN_REQUEST")
        );
        assert_eq!(
            serde_json::to_value(MessageType::FullSyncResponse).unwrap(),
            serde_json::json!("FULL_SYNC_RESPONSE")
        );
        let t: MessageType = serde_json::from_value(serde_json::json!("SENSOR_UPDATE")).unwrap();
        assert_eq!(t, MessageType::SensorUpdate);
        assert_eq!(t.as_str(), "SENSOR_UPDATE");
    }

    #[test]
    fn test_unrecognised_type_fails_decode() {
        let raw = serde_json::json!({
            "type": "TELEPORT",
            "sender_id": "n1",
            "ts_ms": 1,
            "payload": {}
        });
        assert!(serde_json::from_value::<Envelope>(raw).is_err());
    }

    #[test]
    fn test_envelope_stamps_timestamp() {
        let env = Envelope::ping("n1");
        assert!(env.ts_ms > 0);
        assert_eq!(env.sender_id, "n1");
        assert!(env.payload.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_missing_payload_defaults_to_empty_object() {
        let raw = serde_json::json!({
            "type": "PING",
            "sender_id": "n1",
            "ts_ms": 42
        });
        let env: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.payload, serde_json::json!({}));
    }

    #[test]
    fn test_join_request_payload_roundtrip() {
        let env = Envelope::join_request("n1", "10.0.0.5", 7000);
        let payload: JoinRequestPayload = env.payload_as().unwrap();
        assert_eq!(payload.host, "10.0.0.5");
        assert_eq!(payload.port, 7000);
    }

    #[test]
    fn test_payload_schema_mismatch_is_typed_error() {
        let env = Envelope::new(
            MessageType::JoinRequest,
            "n1",
            serde_json::json!({ "host": "x" }),
        );
        let err = env.payload_as::<JoinRequestPayload>().unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
    }

    #[test]
    fn test_integer_values_round_trip_as_integers() {
        let entry = SensorEntry::bare("n1:count", serde_json::json!(7), 1000, "n1");
        let env = Envelope::sensor_update("n1", vec![entry]);
        let text = serde_json::to_string(&env).unwrap();
        assert!(text.contains("\"value\":7"));
        assert!(!text.contains("7.0"));
    }
}
