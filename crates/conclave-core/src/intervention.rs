//! Interventions - human-approval checkpoints raised by agents mid-task
//!
//! An agent builds a [`UserIntervention`] and asks the core for a decision.
//! The orchestrator answers it from conflict arbitration, a registered
//! [`InterventionHandler`], or an asynchronous `resolve_intervention` call.

use chrono::{DateTime, Utc};
use conclave_protocol::InterventionRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Kind of decision requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    /// Yes/no approval of an action
    Approval,
    /// Pick one of `options`
    Choice,
    /// Free-form text input
    Input,
    /// Review a change before it lands
    Review,
    /// Acknowledge something already planned
    Confirmation,
}

impl InterventionKind {
    /// Wire string value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Choice => "choice",
            Self::Input => "input",
            Self::Review => "review",
            Self::Confirmation => "confirmation",
        }
    }

    /// Parse a wire value, defaulting to `Approval` for unknown kinds
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        serde_json::from_value(Value::String(s.to_ascii_lowercase())).unwrap_or(Self::Approval)
    }
}

/// Decision for an intervention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "value", rename_all = "snake_case")]
pub enum InterventionResponse {
    /// Go ahead
    Approved,
    /// Do not perform the action
    Rejected,
    /// Abandon the action (used when another agent takes precedence)
    Cancelled,
    /// Selected option
    Choice(String),
    /// Free-form answer
    Input(String),
}

impl InterventionResponse {
    /// Whether the agent may proceed
    #[must_use]
    pub fn is_affirmative(&self) -> bool {
        matches!(self, Self::Approved | Self::Choice(_) | Self::Input(_))
    }
}

/// A human-approval checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIntervention {
    /// Unique intervention ID
    pub id: Uuid,
    /// Task that raised it
    #[serde(default)]
    pub task_id: Option<Uuid>,
    /// Decision kind
    pub kind: InterventionKind,
    /// Question shown to the human
    pub message: String,
    /// Choices, for choice interventions
    #[serde(default)]
    pub options: Vec<String>,
    /// Extra context for the reviewer
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Milliseconds to wait; `None` waits indefinitely
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// When the intervention was raised
    pub created_at: DateTime<Utc>,
    /// Decision, set exactly once
    #[serde(default)]
    resolution: Option<InterventionResponse>,
    /// When the decision was recorded
    #[serde(default)]
    resolved_at: Option<DateTime<Utc>>,
}

impl UserIntervention {
    /// Create a new unresolved intervention
    pub fn new(kind: InterventionKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: None,
            kind,
            message: message.into(),
            options: Vec::new(),
            context: HashMap::new(),
            timeout_ms: None,
            created_at: Utc::now(),
            resolution: None,
            resolved_at: None,
        }
    }

    /// Approval intervention
    pub fn approval(message: impl Into<String>) -> Self {
        Self::new(InterventionKind::Approval, message)
    }

    /// Choice intervention
    pub fn choice(message: impl Into<String>, options: Vec<String>) -> Self {
        let mut intervention = Self::new(InterventionKind::Choice, message);
        intervention.options = options;
        intervention
    }

    /// Attach the raising task
    #[must_use]
    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Bound the wait
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Add a context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Wait bound, if any
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Recorded decision
    #[must_use]
    pub fn resolution(&self) -> Option<&InterventionResponse> {
        self.resolution.as_ref()
    }

    /// When the decision was recorded
    #[must_use]
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Whether a decision has been recorded
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Record the decision.
    ///
    /// Returns false if a decision was already recorded; the first one stands.
    pub fn resolve(&mut self, response: InterventionResponse) -> bool {
        if self.resolution.is_some() {
            return false;
        }
        self.resolution = Some(response);
        self.resolved_at = Some(Utc::now());
        true
    }

    /// Wire payload for an `intervention-request` message
    #[must_use]
    pub fn to_request(&self, task_id: Uuid) -> InterventionRequest {
        InterventionRequest {
            intervention_id: self.id,
            task_id: self.task_id.unwrap_or(task_id),
            kind: self.kind.as_str().to_string(),
            message: self.message.clone(),
            options: self.options.clone(),
            timeout_ms: self.timeout_ms,
            context: self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Rebuild from an inbound `intervention-request` payload
    #[must_use]
    pub fn from_request(request: InterventionRequest) -> Self {
        Self {
            id: request.intervention_id,
            task_id: Some(request.task_id),
            kind: InterventionKind::parse_lenient(&request.kind),
            message: request.message,
            options: request.options,
            context: request.context.into_iter().collect(),
            timeout_ms: request.timeout_ms,
            created_at: Utc::now(),
            resolution: None,
            resolved_at: None,
        }
    }
}

/// Human-facing decision source, registered by the UI/pane layer.
///
/// Returning `Ok(None)` means "no opinion"; the next handler is asked.
/// Errors are logged and treated as "no opinion".
#[async_trait::async_trait]
pub trait InterventionHandler: Send + Sync {
    /// Decide on an intervention
    async fn handle(
        &self,
        intervention: &UserIntervention,
    ) -> anyhow::Result<Option<InterventionResponse>>;
}
