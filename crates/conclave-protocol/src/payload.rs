//! Typed payloads, one per message kind.
//!
//! Building a message from one of these structs guarantees the payload
//! fields the kind requires; see [`MessageKind::required_fields`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::message::MessageKind;

/// A typed payload bound to exactly one message kind
pub trait Payload: Serialize + DeserializeOwned {
    /// Kind of the envelope that carries this payload
    const KIND: MessageKind;
}

/// `task-create` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreate {
    /// Task ID
    pub task_id: Uuid,
    /// Task type (e.g., "implement", "review")
    pub task_type: String,
    /// Human-readable description
    pub description: String,
    /// Capabilities the executing agent must advertise
    pub capabilities: Vec<String>,
    /// Priority 1-10
    pub priority: u8,
    /// Kind of agent the host should spawn
    #[serde(default)]
    pub agent_type: Option<String>,
    /// Host-specific pane/session settings
    #[serde(default)]
    pub pane: Option<Value>,
    /// Declared resource claims
    #[serde(default)]
    pub resources: Vec<String>,
    /// Opaque task context
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Payload for TaskCreate {
    const KIND: MessageKind = MessageKind::TaskCreate;
}

/// `task-cancel` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCancel {
    /// Task to cancel
    pub task_id: Uuid,
    /// Why the task is being cancelled
    #[serde(default)]
    pub reason: Option<String>,
}

impl Payload for TaskCancel {
    const KIND: MessageKind = MessageKind::TaskCancel;
}

/// `task-complete` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskComplete {
    /// Completed task
    pub task_id: Uuid,
    /// Whether the agent considers the task successful
    pub success: bool,
    /// Primary output
    #[serde(default)]
    pub output: String,
    /// Full serialized result, when the sender has one
    #[serde(default)]
    pub result: Option<Value>,
    /// Wall-clock execution time
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl Payload for TaskComplete {
    const KIND: MessageKind = MessageKind::TaskComplete;
}

/// `task-failed` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailed {
    /// Failed task
    pub task_id: Uuid,
    /// Error description
    pub error: String,
    /// Partial serialized result (logs, artifacts)
    #[serde(default)]
    pub result: Option<Value>,
}

impl Payload for TaskFailed {
    const KIND: MessageKind = MessageKind::TaskFailed;
}

/// `progress-update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Task reporting progress
    pub task_id: Uuid,
    /// Fraction complete, 0.0-1.0
    pub progress: f32,
    /// Status line
    #[serde(default)]
    pub message: String,
}

impl Payload for ProgressUpdate {
    const KIND: MessageKind = MessageKind::ProgressUpdate;
}

/// `intervention-request` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRequest {
    /// Intervention ID
    pub intervention_id: Uuid,
    /// Task that raised it
    pub task_id: Uuid,
    /// approval / choice / input / review / confirmation
    pub kind: String,
    /// Question shown to the human
    pub message: String,
    /// Choices, for choice interventions
    #[serde(default)]
    pub options: Vec<String>,
    /// Milliseconds to wait before giving up
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra context for the reviewer
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Payload for InterventionRequest {
    const KIND: MessageKind = MessageKind::InterventionRequest;
}

/// `intervention-response` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionResponse {
    /// Intervention being answered
    pub intervention_id: Uuid,
    /// Decision; `null` when the wait timed out
    pub response: Option<Value>,
    /// Time between request and decision
    pub elapsed_ms: u64,
}

impl Payload for InterventionResponse {
    const KIND: MessageKind = MessageKind::InterventionResponse;
}

/// `agent-register` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegister {
    /// Agent ID
    pub agent_id: String,
    /// Agent implementation kind
    #[serde(default)]
    pub agent_type: String,
    /// Advertised capabilities
    pub capabilities: Vec<String>,
}

impl Payload for AgentRegister {
    const KIND: MessageKind = MessageKind::AgentRegister;
}

/// `agent-unregister` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUnregister {
    /// Agent ID
    pub agent_id: String,
    /// Why the agent left
    #[serde(default)]
    pub reason: Option<String>,
}

impl Payload for AgentUnregister {
    const KIND: MessageKind = MessageKind::AgentUnregister;
}

/// `agent-heartbeat` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHeartbeat {
    /// Agent ID
    pub agent_id: String,
    /// Tasks the agent is currently running
    #[serde(default)]
    pub active_tasks: usize,
}

impl Payload for AgentHeartbeat {
    const KIND: MessageKind = MessageKind::AgentHeartbeat;
}

/// `broadcast` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastNotice {
    /// Topic
    pub topic: String,
    /// Arbitrary body
    #[serde(default)]
    pub data: Value,
}

impl Payload for BroadcastNotice {
    const KIND: MessageKind = MessageKind::Broadcast;
}

/// `sync-request` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// What to synchronise (e.g., "claims", "agent_info")
    pub scope: String,
    /// Request body
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Payload for SyncRequest {
    const KIND: MessageKind = MessageKind::SyncRequest;
}

/// `sync-response` payload
///
/// Doubles as the acknowledgement for `task-create` and `task-cancel`; an
/// acknowledgement of a task creation carries the remote agent and pane IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Whether the request was accepted
    pub accepted: bool,
    /// Remote agent ID
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Remote pane/session ID
    #[serde(default)]
    pub pane_id: Option<String>,
    /// Rejection reason
    #[serde(default)]
    pub error: Option<String>,
    /// Response body
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl SyncResponse {
    /// Positive acknowledgement for a created agent.
    pub fn accepted(agent_id: impl Into<String>, pane_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            agent_id: Some(agent_id.into()),
            pane_id: Some(pane_id.into()),
            error: None,
            data: Map::new(),
        }
    }

    /// Plain positive acknowledgement.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            accepted: true,
            agent_id: None,
            pane_id: None,
            error: None,
            data: Map::new(),
        }
    }

    /// Negative acknowledgement.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            agent_id: None,
            pane_id: None,
            error: Some(error.into()),
            data: Map::new(),
        }
    }
}

impl Payload for SyncResponse {
    const KIND: MessageKind = MessageKind::SyncResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_response_constructors() {
        let ack = SyncResponse::accepted("child-1", "pane-3");
        assert!(ack.accepted);
        assert_eq!(ack.agent_id.as_deref(), Some("child-1"));

        let nack = SyncResponse::rejected("host busy");
        assert!(!nack.accepted);
        assert_eq!(nack.error.as_deref(), Some("host busy"));
    }

    #[test]
    fn test_optional_fields_default_on_decode() {
        let raw = serde_json::json!({
            "task_id": Uuid::nil(),
            "task_type": "review",
            "description": "review auth",
            "capabilities": ["code_review"],
            "priority": 5
        });
        let create: TaskCreate = serde_json::from_value(raw).unwrap();
        assert!(create.resources.is_empty());
        assert!(create.agent_type.is_none());
    }
}
