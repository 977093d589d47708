//! Task data model
//!
//! `AgentTask` is what callers submit; `AgentResult` is the immutable record
//! produced once a task reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::intervention::UserIntervention;

/// Lowest task priority
pub const MIN_PRIORITY: u8 = 1;
/// Highest task priority
pub const MAX_PRIORITY: u8 = 10;
/// Priority given to tasks that don't set one
pub const DEFAULT_PRIORITY: u8 = 5;

/// Capability tag an agent advertises and a task requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Writing new code
    CodeGeneration,
    /// Reviewing existing code
    CodeReview,
    /// Writing and running tests
    Testing,
    /// Writing documentation
    Documentation,
    /// Diagnosing failures
    Debugging,
    /// Restructuring code without behaviour change
    Refactoring,
    /// System and API design
    Architecture,
    /// Security review and hardening
    Security,
    /// Profiling and optimisation
    Performance,
    /// Build, release and infrastructure work
    Deployment,
    /// Reading and summarising sources
    Research,
    /// Breaking work down into steps
    Planning,
}

impl Capability {
    /// Wire string value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::CodeReview => "code_review",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Debugging => "debugging",
            Self::Refactoring => "refactoring",
            Self::Architecture => "architecture",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Deployment => "deployment",
            Self::Research => "research",
            Self::Planning => "planning",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_ascii_lowercase()))
            .map_err(|_| format!("unknown capability '{s}'"))
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet submitted
    Pending,
    /// Waiting in the task queue or an agent lane
    Queued,
    /// Executing on an agent
    Running,
    /// Blocked on a human decision
    WaitingIntervention,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled cooperatively
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are allowed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work routed to a capable agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique task ID (never reused)
    pub id: Uuid,
    /// Task type (e.g., "implement", "review")
    pub task_type: String,
    /// What the agent should do
    pub description: String,
    /// Opaque context passed through to the agent
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Capabilities the executing agent must advertise
    #[serde(default)]
    pub capabilities_required: BTreeSet<Capability>,
    /// Priority 1-10 (10 = most urgent)
    pub priority: u8,
    /// Execution deadline in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Whether the agent may raise interventions
    pub allow_intervention: bool,
    /// Current status
    pub status: TaskStatus,
    /// Parent task, for subtasks of a shared goal
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Child task IDs
    #[serde(default)]
    pub subtask_ids: Vec<Uuid>,
    /// Resources this task will read or write (file paths, tables, APIs)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Tasks that must finish before this one
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Agent to prefer when it is eligible
    #[serde(default)]
    pub preferred_agent: Option<String>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    /// Create a new pending task
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            description: description.into(),
            context: HashMap::new(),
            capabilities_required: BTreeSet::new(),
            priority: DEFAULT_PRIORITY,
            timeout_ms: None,
            allow_intervention: true,
            status: TaskStatus::Pending,
            parent_id: None,
            subtask_ids: Vec::new(),
            resources: Vec::new(),
            dependencies: Vec::new(),
            preferred_agent: None,
            created_at: Utc::now(),
        }
    }

    /// Require a capability
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities_required.insert(capability);
        self
    }

    /// Require several capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities_required.extend(capabilities);
        self
    }

    /// Set priority, clamped to 1-10
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    /// Set an execution deadline
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

    /// Declare a resource claim
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
        self
    }

    /// Declare a dependency on another task
    #[must_use]
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Mark as a subtask of `parent_id`
    #[must_use]
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Prefer a specific agent
    #[must_use]
    pub fn pinned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.preferred_agent = Some(agent_id.into());
        self
    }

    /// Forbid interventions; requests resolve to `None` immediately
    #[must_use]
    pub fn without_intervention(mut self) -> Self {
        self.allow_intervention = false;
        self
    }

    /// Execution deadline, if any
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Transition to `status`.
    ///
    /// Returns false (and leaves the task unchanged) if the task is already terminal.
    pub fn set_status(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    /// Whether an agent advertising `capabilities` may run this task
    pub fn is_satisfied_by<'a>(&self, capabilities: impl IntoIterator<Item = &'a Capability>) -> bool {
        let offered: BTreeSet<Capability> = capabilities.into_iter().copied().collect();
        self.capabilities_required.is_subset(&offered)
    }
}

/// Outcome of a task. Built once at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Task this result belongs to
    pub task_id: Uuid,
    /// Whether the task succeeded
    pub success: bool,
    /// Primary output
    pub output: String,
    /// Error description for failed/cancelled tasks
    pub error: Option<String>,
    /// Log lines, in order
    #[serde(default)]
    pub logs: Vec<String>,
    /// Named artifacts (patches, reports, file lists)
    #[serde(default)]
    pub artifacts: HashMap<String, Value>,
    /// Numeric metrics
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    /// Interventions raised during execution, in order
    #[serde(default)]
    pub interventions: Vec<UserIntervention>,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
}

impl AgentResult {
    fn base(task_id: Uuid, success: bool, output: String, error: Option<String>) -> Self {
        Self {
            task_id,
            success,
            output,
            error,
            logs: Vec::new(),
            artifacts: HashMap::new(),
            metrics: HashMap::new(),
            interventions: Vec::new(),
            execution_time_ms: 0,
        }
    }

    /// Successful result
    pub fn success(task_id: Uuid, output: impl Into<String>) -> Self {
        Self::base(task_id, true, output.into(), None)
    }

    /// Failed result
    pub fn failure(task_id: Uuid, error: impl Into<String>) -> Self {
        Self::base(task_id, false, String::new(), Some(error.into()))
    }

    /// Cancelled result
    #[must_use]
    pub fn cancelled(task_id: Uuid) -> Self {
        Self::base(task_id, false, String::new(), Some("cancelled".to_string()))
    }

    /// Append log lines
    #[must_use]
    pub fn with_logs(mut self, logs: impl IntoIterator<Item = String>) -> Self {
        self.logs.extend(logs);
        self
    }

    /// Add an artifact
    #[must_use]
    pub fn with_artifact(mut self, name: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(name.into(), value);
        self
    }

    /// Merge artifacts, keeping existing entries on name collision
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: HashMap<String, Value>) -> Self {
        for (name, value) in artifacts {
            self.artifacts.entry(name).or_insert(value);
        }
        self
    }

    /// Record a metric
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Append intervention records
    #[must_use]
    pub fn with_interventions(mut self, interventions: impl IntoIterator<Item = UserIntervention>) -> Self {
        self.interventions.extend(interventions);
        self
    }

    /// Set execution time
    #[must_use]
    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = elapsed.as_millis() as u64;
        self
    }

    /// Whether this result represents a cooperative cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !self.success && self.error.as_deref() == Some("cancelled")
    }

    /// Terminal status implied by this result
    #[must_use]
    pub fn terminal_status(&self) -> TaskStatus {
        if self.success {
            TaskStatus::Completed
        } else if self.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_second_timeout_is_kept() {
        let task = AgentTask::new("t", "d").with_timeout(Duration::from_millis(250));
        assert_eq!(task.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(serde_json::to_value(&task).unwrap()["timeout_ms"], 250);
    }

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(AgentTask::new("t", "d").with_priority(0).priority, MIN_PRIORITY);
        assert_eq!(AgentTask::new("t", "d").with_priority(42).priority, MAX_PRIORITY);
        assert_eq!(AgentTask::new("t", "d").priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut task = AgentTask::new("review", "review auth.py");
        assert!(task.set_status(TaskStatus::Running));
        assert!(task.set_status(TaskStatus::Completed));
        assert!(!task.set_status(TaskStatus::Running));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_capability_superset_check() {
        let task = AgentTask::new("review", "r")
            .with_capability(Capability::CodeReview)
            .with_capability(Capability::Security);

        assert!(task.is_satisfied_by(&[
            Capability::CodeReview,
            Capability::Security,
            Capability::Testing
        ]));
        assert!(!task.is_satisfied_by(&[Capability::CodeReview]));
        assert!(AgentTask::new("any", "no requirements").is_satisfied_by(&[]));
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!("code_review".parse::<Capability>(), Ok(Capability::CodeReview));
        assert_eq!("TESTING".parse::<Capability>(), Ok(Capability::Testing));
        assert!("juggling".parse::<Capability>().is_err());
    }

    #[test]
    fn test_result_terminal_status() {
        let id = Uuid::new_v4();
        assert_eq!(AgentResult::success(id, "ok").terminal_status(), TaskStatus::Completed);
        assert_eq!(AgentResult::failure(id, "boom").terminal_status(), TaskStatus::Failed);
        assert_eq!(AgentResult::cancelled(id).terminal_status(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_resource_and_dependency_dedup() {
        let dep = Uuid::new_v4();
        let task = AgentTask::new("t", "d")
            .with_resource("auth.py")
            .with_resource("auth.py")
            .with_dependency(dep)
            .with_dependency(dep);
        assert_eq!(task.resources, vec!["auth.py".to_string()]);
        assert_eq!(task.dependencies, vec![dep]);
    }
}
