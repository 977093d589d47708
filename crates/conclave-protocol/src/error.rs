//! Error types for conclave-protocol

use thiserror::Error;

use crate::message::MessageKind;

/// Protocol error type
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload field required by the message kind is absent
    #[error("{kind} message is missing required payload field '{field}'")]
    MissingField {
        /// Message kind being validated
        kind: MessageKind,
        /// Name of the missing field
        field: &'static str,
    },

    /// Payload was decoded as the wrong kind
    #[error("expected {expected} payload, message is {actual}")]
    KindMismatch {
        /// Kind the caller asked for
        expected: MessageKind,
        /// Kind carried by the envelope
        actual: MessageKind,
    },

    /// Payload did not serialize to a JSON object
    #[error("payload for {0} must be a JSON object")]
    InvalidPayload(MessageKind),

    /// Envelope-level inconsistency (empty sender, self-reply, version)
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ProtocolError>;
