//! Orchestrator types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Collaborator that hosts child agents (receives task-create/cancel)
    #[serde(default = "default_host_agent")]
    pub host_agent: String,
    /// Sender ID used on outbound messages
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// How long to wait for a host acknowledgement
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Words in an intervention message that trigger the conflict pre-check
    #[serde(default = "default_sensitive_keywords")]
    pub sensitive_keywords: Vec<String>,
    /// Wait bound for interventions that don't set one; unset waits indefinitely
    #[serde(default)]
    pub default_intervention_timeout_secs: Option<u64>,
}

fn default_host_agent() -> String {
    "host".to_string()
}

fn default_agent_id() -> String {
    "orchestrator".to_string()
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_sensitive_keywords() -> Vec<String> {
    vec!["file".to_string(), "create".to_string(), "delete".to_string()]
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            host_agent: default_host_agent(),
            agent_id: default_agent_id(),
            ack_timeout_ms: default_ack_timeout_ms(),
            sensitive_keywords: default_sensitive_keywords(),
            default_intervention_timeout_secs: None,
        }
    }
}

/// Lifecycle of a child agent. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    /// Working on its task
    Running,
    /// Task finished successfully
    Completed,
    /// Task failed
    Failed,
    /// Cancelled by the orchestrator
    Cancelled,
}

impl ChildStatus {
    /// Whether no further transitions are allowed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A child agent provisioned on the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildAgentHandle {
    /// Remote agent ID (from the host acknowledgement)
    pub agent_id: String,
    /// Agent kind requested
    pub agent_type: String,
    /// Task the child runs
    pub task_id: Uuid,
    /// Remote pane/session ID
    pub pane_id: Option<String>,
    /// When the child was created
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: ChildStatus,
    /// Last reported progress, 0.0-1.0
    pub progress: f32,
    /// Last heartbeat from the child
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl ChildAgentHandle {
    /// Move to `status`; returns false once terminal
    pub(crate) fn transition(&mut self, status: ChildStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

/// Progress reported by a child or a locally dispatched task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Reporting agent
    pub agent_id: String,
    /// Task the progress belongs to
    pub task_id: Uuid,
    /// 0.0-1.0
    pub progress: f32,
    /// Status line
    pub message: String,
}

/// Terminal report from a child agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildCompletion {
    /// Child agent
    pub agent_id: String,
    /// Finished task
    pub task_id: Uuid,
    /// Whether the task succeeded
    pub success: bool,
    /// Output, for successful tasks
    pub output: String,
    /// Error, for failed tasks
    pub error: Option<String>,
    /// Structured result, if the child sent one
    pub result: Option<Value>,
    /// Execution time reported by the child
    pub execution_time_ms: u64,
}
