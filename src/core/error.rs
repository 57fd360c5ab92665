//! Error types and wire error kinds.
//!
//! Sensorhub distinguishes transport-level failures (which close or degrade a
//! single session/worker) from protocol-level failures (which produce an ERROR
//! reply on the session). Each runtime-recoverable variant maps to a stable
//! `kind` string that is carried in ERROR payloads and log lines.

use thiserror::Error;

/// Common sensorhub error conditions.
#[derive(Debug, Error)]
pub enum HubError {
    /// An envelope that cannot be put on the wire: the encoded body exceeds
    /// the frame size cap.
    ///
    /// Decode-side violations (truncated or malformed frames) never reach an
    /// error value: the frame decoder reports them as
    /// [`crate::proto::framing::DecodeOutcome::Invalid`] and the read loop
    /// logs them under this kind before closing the connection.
    #[error("frame violation: {detail}")]
    FrameDecode { detail: String },

    /// Valid envelope whose type has no registered handler.
    #[error("no handler registered for message type {type_name}")]
    UnknownType { type_name: String },

    /// Payload missing a required field or carrying a wrong-typed one.
    #[error("schema mismatch in {message_type} payload: {detail}")]
    SchemaMismatch {
        message_type: String,
        detail: String,
    },

    /// Per-peer send queue exceeded its bound; oldest entries were dropped.
    #[error("send queue overflow for peer {peer_id}")]
    QueueOverflow { peer_id: String },

    /// Outbound TCP connect failed; the worker will retry under backoff.
    #[error("connect to {addr} failed: {detail}")]
    ConnectFailed { addr: String, detail: String },

    /// Socket write failed or the envelope could not be enqueued.
    #[error("send to {peer_id} failed: {detail}")]
    SendFailed { peer_id: String, detail: String },

    /// Reserved message type decoded but deliberately unhandled.
    #[error("{operation} is not implemented")]
    NotImplemented { operation: String },

    /// Bad or missing configuration at startup.
    #[error("configuration error: {detail}")]
    Config { detail: String },

    /// Internal invariant violation.
    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl HubError {
    /// Stable `kind` string for ERROR payloads and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FrameDecode { .. } => "frame_decode",
            Self::UnknownType { .. } => "unknown_type",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::QueueOverflow { .. } => "queue_overflow",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::SendFailed { .. } => "send_failed",
            Self::NotImplemented { .. } => "not_implemented",
            Self::Config { .. } => "config_error",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether the dispatcher answers this error with an ERROR envelope
    /// while keeping the session open.
    pub fn replies_on_wire(&self) -> bool {
        matches!(
            self,
            Self::UnknownType { .. } | Self::SchemaMismatch { .. } | Self::NotImplemented { .. }
        )
    }

    /// Shorthand for a schema mismatch on a given message type.
    pub fn schema(message_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message_type: message_type.into(),
            detail: detail.into(),
        }
    }

    /// Shorthand for an internal error.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }
}

/// Result type using HubError.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let cases: Vec<(HubError, &str)> = vec![
            (
                HubError::FrameDecode {
                    detail: "short".into(),
                },
                "frame_decode",
            ),
            (
                HubError::UnknownType {
                    type_name: "BOGUS".into(),
                },
                "unknown_type",
            ),
            (
                HubError::schema("PEER_LIST", "missing peers"),
                "schema_mismatch",
            ),
            (
                HubError::QueueOverflow {
                    peer_id: "n2".into(),
                },
                "queue_overflow",
            ),
            (
                HubError::ConnectFailed {
                    addr: "10.0.0.1:7000".into(),
                    detail: "refused".into(),
                },
                "connect_failed",
            ),
            (
                HubError::SendFailed {
                    peer_id: "n2".into(),
                    detail: "broken pipe".into(),
                },
                "send_failed",
            ),
            (
                HubError::NotImplemented {
                    operation: "GOSSIP_STATE".into(),
                },
                "not_implemented",
            ),
            (
                HubError::Config {
                    detail: "missing NODE_ID".into(),
                },
                "config_error",
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_wire_reply_errors() {
        assert!(HubError::NotImplemented {
            operation: "FULL_SYNC_REQUEST".into()
        }
        .replies_on_wire());
        assert!(HubError::schema("SENSOR_UPDATE", "bad ts_ms").replies_on_wire());
        assert!(!HubError::SendFailed {
            peer_id: "n1".into(),
            detail: "reset".into()
        }
        .replies_on_wire());
    }
}
