//! Envelope type and wire codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::payload::Payload;

/// Current envelope version. Decoding rejects newer envelopes.
pub const PROTOCOL_VERSION: u16 = 1;

fn default_version() -> u16 {
    PROTOCOL_VERSION
}

/// Closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Ask a host to create a task (and usually a child agent for it)
    TaskCreate,
    /// Cooperatively cancel a task
    TaskCancel,
    /// Task finished successfully
    TaskComplete,
    /// Task finished with an error
    TaskFailed,
    /// Intermediate progress report
    ProgressUpdate,
    /// Agent asks for a human decision
    InterventionRequest,
    /// Decision for an earlier intervention request
    InterventionResponse,
    /// Agent joined the workspace
    AgentRegister,
    /// Agent left the workspace
    AgentUnregister,
    /// Liveness signal
    AgentHeartbeat,
    /// Workspace-wide notice
    Broadcast,
    /// State synchronisation request
    SyncRequest,
    /// State synchronisation reply; also used as acknowledgement
    SyncResponse,
}

impl MessageKind {
    /// All kinds, in declaration order
    pub const ALL: [MessageKind; 13] = [
        Self::TaskCreate,
        Self::TaskCancel,
        Self::TaskComplete,
        Self::TaskFailed,
        Self::ProgressUpdate,
        Self::InterventionRequest,
        Self::InterventionResponse,
        Self::AgentRegister,
        Self::AgentUnregister,
        Self::AgentHeartbeat,
        Self::Broadcast,
        Self::SyncRequest,
        Self::SyncResponse,
    ];

    /// Wire string value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreate => "task-create",
            Self::TaskCancel => "task-cancel",
            Self::TaskComplete => "task-complete",
            Self::TaskFailed => "task-failed",
            Self::ProgressUpdate => "progress-update",
            Self::InterventionRequest => "intervention-request",
            Self::InterventionResponse => "intervention-response",
            Self::AgentRegister => "agent-register",
            Self::AgentUnregister => "agent-unregister",
            Self::AgentHeartbeat => "agent-heartbeat",
            Self::Broadcast => "broadcast",
            Self::SyncRequest => "sync-request",
            Self::SyncResponse => "sync-response",
        }
    }

    /// Payload fields every message of this kind must carry
    #[must_use]
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::TaskCreate => &["task_id", "capabilities", "description"],
            Self::TaskCancel => &["task_id"],
            Self::TaskComplete => &["task_id", "success"],
            Self::TaskFailed => &["task_id", "error"],
            Self::ProgressUpdate => &["task_id", "progress"],
            Self::InterventionRequest => &["intervention_id", "task_id", "kind", "message"],
            Self::InterventionResponse => &["intervention_id", "response", "elapsed_ms"],
            Self::AgentRegister => &["agent_id", "capabilities"],
            Self::AgentUnregister | Self::AgentHeartbeat => &["agent_id"],
            Self::Broadcast => &["topic"],
            Self::SyncRequest => &["scope"],
            Self::SyncResponse => &["accepted"],
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message envelope.
///
/// Immutable once built: constructors produce a complete message and there
/// are no setters, only consuming `with_*` builders used before sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Envelope version
    #[serde(default = "default_version")]
    pub version: u16,
    /// Unique message ID
    pub message_id: Uuid,
    /// Sending agent ID
    pub from_agent: String,
    /// Receiving agent ID; `None` means broadcast
    #[serde(default)]
    pub to_agent: Option<String>,
    /// Message kind
    pub kind: MessageKind,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Links a chain of causally related messages
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    /// ID of the earlier message this one answers
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

impl AgentMessage {
    /// Create a message from a raw payload map.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: Option<String>,
        kind: MessageKind,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_id: Uuid::new_v4(),
            from_agent: from_agent.into(),
            to_agent,
            kind,
            timestamp: Utc::now(),
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Build a well-formed message from a typed payload.
    ///
    /// The payload type fixes the kind, so the fields required for that kind
    /// are always present.
    pub fn from_payload<P: Payload>(
        from_agent: impl Into<String>,
        to_agent: Option<String>,
        payload: &P,
    ) -> Result<Self> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::InvalidPayload(P::KIND)),
        };
        let message = Self::new(from_agent, to_agent, P::KIND, payload);
        message.validate()?;
        Ok(message)
    }

    /// Build a reply to `original`.
    ///
    /// The reply is addressed to the original sender, points `reply_to` at the
    /// original message and inherits its correlation chain (or starts one
    /// rooted at the original message).
    pub fn reply<P: Payload>(
        original: &AgentMessage,
        from_agent: impl Into<String>,
        payload: &P,
    ) -> Result<Self> {
        let mut message =
            Self::from_payload(from_agent, Some(original.from_agent.clone()), payload)?;
        message.reply_to = Some(original.message_id);
        message.correlation_id = Some(original.correlation_id.unwrap_or(original.message_id));
        // Clock skew must not make a reply appear to precede its cause
        if message.timestamp < original.timestamp {
            message.timestamp = original.timestamp;
        }
        Ok(message)
    }

    /// Attach a correlation ID.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Whether this message has no explicit recipient.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }

    /// Decode the payload as a typed value.
    pub fn decode_payload<P: Payload>(&self) -> Result<P> {
        if self.kind != P::KIND {
            return Err(ProtocolError::KindMismatch {
                expected: P::KIND,
                actual: self.kind,
            });
        }
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    /// Read a string field from the payload.
    #[must_use]
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Check envelope invariants and the required payload fields of the kind.
    pub fn validate(&self) -> Result<()> {
        if self.version > PROTOCOL_VERSION {
            return Err(ProtocolError::Malformed(format!(
                "unsupported envelope version {}",
                self.version
            )));
        }
        if self.from_agent.trim().is_empty() {
            return Err(ProtocolError::Malformed("empty from_agent".to_string()));
        }
        if self.reply_to == Some(self.message_id) {
            return Err(ProtocolError::Malformed(
                "message replies to itself".to_string(),
            ));
        }
        for field in self.kind.required_fields().iter().copied() {
            if !self.payload.contains_key(field) {
                return Err(ProtocolError::MissingField {
                    kind: self.kind,
                    field,
                });
            }
        }
        Ok(())
    }
}

/// Encode a message to its JSON wire form.
pub fn encode(message: &AgentMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode and validate a message from its JSON wire form.
pub fn decode(raw: &str) -> Result<AgentMessage> {
    let message: AgentMessage = serde_json::from_str(raw)?;
    message.validate()?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::*;

    fn sample_create() -> TaskCreate {
        TaskCreate {
            task_id: Uuid::new_v4(),
            task_type: "implement".to_string(),
            description: "add login endpoint".to_string(),
            capabilities: vec!["code_generation".to_string()],
            priority: 7,
            agent_type: Some("coder".to_string()),
            pane: None,
            resources: vec!["src/auth.py".to_string()],
            context: Map::new(),
        }
    }

    #[test]
    fn test_kind_wire_values() {
        for kind in MessageKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_wire_shape() {
        let msg = AgentMessage::from_payload("orchestrator", Some("host".into()), &sample_create())
            .unwrap();
        let value: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();

        assert_eq!(value["kind"], "task-create");
        assert_eq!(value["message_id"], msg.message_id.to_string());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
        assert!(value["payload"].is_object());
        assert_eq!(value["payload"]["priority"], 7);
    }

    #[test]
    fn test_decode_roundtrip_every_kind() {
        let task_id = Uuid::new_v4();
        let messages = vec![
            AgentMessage::from_payload("a", Some("b".into()), &sample_create()).unwrap(),
            AgentMessage::from_payload(
                "a",
                Some("b".into()),
                &TaskCancel {
                    task_id,
                    reason: None,
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &TaskComplete {
                    task_id,
                    success: true,
                    output: "done".into(),
                    result: None,
                    execution_time_ms: 12,
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &TaskFailed {
                    task_id,
                    error: "boom".into(),
                    result: None,
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &ProgressUpdate {
                    task_id,
                    progress: 0.5,
                    message: "half".into(),
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &InterventionRequest {
                    intervention_id: Uuid::new_v4(),
                    task_id,
                    kind: "approval".into(),
                    message: "delete file?".into(),
                    options: vec![],
                    timeout_ms: Some(5_000),
                    context: Map::new(),
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &InterventionResponse {
                    intervention_id: Uuid::new_v4(),
                    response: None,
                    elapsed_ms: 1000,
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &AgentRegister {
                    agent_id: "a".into(),
                    agent_type: "coder".into(),
                    capabilities: vec!["testing".into()],
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &AgentUnregister {
                    agent_id: "a".into(),
                    reason: Some("bye".into()),
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &AgentHeartbeat {
                    agent_id: "a".into(),
                    active_tasks: 2,
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &BroadcastNotice {
                    topic: "goal".into(),
                    data: Value::Null,
                },
            )
            .unwrap(),
            AgentMessage::from_payload(
                "a",
                None,
                &SyncRequest {
                    scope: "claims".into(),
                    data: Map::new(),
                },
            )
            .unwrap(),
            AgentMessage::from_payload("a", None, &SyncResponse::accepted("agent-1", "pane-1"))
                .unwrap(),
        ];

        assert_eq!(messages.len(), MessageKind::ALL.len());
        for msg in messages {
            let decoded = decode(&encode(&msg).unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_reply_links_to_original() {
        let original =
            AgentMessage::from_payload("orchestrator", Some("host".into()), &sample_create())
                .unwrap();
        let ack = AgentMessage::reply(&original, "host", &SyncResponse::accepted("c1", "p1"))
            .unwrap();

        assert_eq!(ack.reply_to, Some(original.message_id));
        assert_eq!(ack.correlation_id, Some(original.message_id));
        assert_eq!(ack.to_agent.as_deref(), Some("orchestrator"));
        assert!(ack.timestamp >= original.timestamp);
    }

    #[test]
    fn test_decode_rejects_missing_required_field() {
        let mut msg =
            AgentMessage::from_payload("a", Some("b".into()), &sample_create()).unwrap();
        msg.payload.remove("capabilities");
        let raw = serde_json::to_string(&msg).unwrap();

        match decode(&raw) {
            Err(ProtocolError::MissingField { field, .. }) => assert_eq!(field, "capabilities"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut msg =
            AgentMessage::from_payload("a", Some("b".into()), &sample_create()).unwrap();
        msg.version = PROTOCOL_VERSION + 1;
        let raw = serde_json::to_string(&msg).unwrap();
        assert!(matches!(decode(&raw), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_payload_kind_mismatch() {
        let msg = AgentMessage::from_payload("a", None, &sample_create()).unwrap();
        let err = msg.decode_payload::<TaskCancel>().unwrap_err();
        assert!(matches!(err, ProtocolError::KindMismatch { .. }));

        let create: TaskCreate = msg.decode_payload().unwrap();
        assert_eq!(create.description, "add login endpoint");
    }

    #[test]
    fn test_missing_to_agent_is_broadcast() {
        let raw = r#"{
            "message_id": "6f1a1b5e-1d0e-4a55-9d2f-0d4c9f1e2a10",
            "from_agent": "host",
            "kind": "broadcast",
            "timestamp": "2026-01-01T12:00:00Z",
            "payload": {"topic": "shutdown"}
        }"#;
        let msg = decode(raw).unwrap();
        assert!(msg.is_broadcast());
        assert_eq!(msg.version, PROTOCOL_VERSION);
    }
}
