//! Coordinator data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Resolutions kept in the in-memory history (oldest evicted first)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Window length for time-sliced resources
    #[serde(default = "default_time_slice_secs")]
    pub time_slice_secs: u64,
    /// Extensions that make a resource key a source file
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    /// Collaboration requests matching any rule are denied
    #[serde(default)]
    pub deny_rules: Vec<DenyRule>,
}

fn default_history_limit() -> usize {
    100
}

fn default_time_slice_secs() -> u64 {
    300
}

fn default_source_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "cs",
        "rb", "swift", "php", "scala",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            time_slice_secs: default_time_slice_secs(),
            source_extensions: default_source_extensions(),
            deny_rules: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Whether `resource` names a source file
    #[must_use]
    pub fn is_source_file(&self, resource: &str) -> bool {
        let name = resource.rsplit(['/', '\\']).next().unwrap_or(resource);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .source_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}

/// Collaboration deny rule. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyRule {
    /// Requesting agent
    #[serde(default)]
    pub from: Option<String>,
    /// Receiving agent
    #[serde(default)]
    pub to: Option<String>,
    /// Collaboration kind
    #[serde(default)]
    pub kind: Option<CollaborationKind>,
}

impl DenyRule {
    /// Whether this rule denies the request
    #[must_use]
    pub fn matches(&self, from: &str, to: &str, kind: CollaborationKind) -> bool {
        self.from.as_deref().map_or(true, |f| f == from)
            && self.to.as_deref().map_or(true, |t| t == to)
            && self.kind.map_or(true, |k| k == kind)
    }
}

/// What one agent asks of another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationKind {
    /// Hand a task to the receiving agent
    DelegateTask,
    /// Grant the requester exclusive use of a resource
    LockResource,
    /// Merge state into the receiving agent's tracked info
    MergeState,
}

/// Kind of detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two agents claim the same source file
    File,
    /// Two agents claim the same non-file resource
    Resource,
    /// A task depends on another agent's active task
    Dependency,
    /// Two agents duplicate the same piece of a shared goal
    Logical,
    /// Two agents' tasks unblock at the same instant
    Timing,
}

impl ConflictKind {
    /// Wire string value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Resource => "resource",
            Self::Dependency => "dependency",
            Self::Logical => "logical",
            Self::Timing => "timing",
        }
    }

    /// Fixed resolution for this kind
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        match self {
            Self::File => Resolution::SequentialSections,
            Self::Resource => Resolution::TimeSlice,
            Self::Dependency => Resolution::Reorder,
            Self::Logical => Resolution::Merge,
            Self::Timing => Resolution::Defer,
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Disjoint sections per agent, worked in priority order
    SequentialSections,
    /// One time window per agent, in claim order
    TimeSlice,
    /// Prerequisite runs before the dependent task
    Reorder,
    /// Primary does the work, secondary merges in at the merge point
    Merge,
    /// Lower-priority task is rescheduled
    Defer,
}

impl Resolution {
    /// Wire string value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SequentialSections => "sequential_sections",
            Self::TimeSlice => "time_slice",
            Self::Reorder => "reorder",
            Self::Merge => "merge",
            Self::Defer => "defer",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceClaim {
    /// Resource key (file path, table, API)
    pub resource: String,
    /// Owning agent
    pub agent_id: String,
    /// Declaring task (or collaboration request for locks)
    pub task_id: Uuid,
    /// Monotonic registration sequence; lower registered first
    pub sequence: u64,
    /// When the claim was made
    pub claimed_at: DateTime<Utc>,
}

/// One window of a time-sliced resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Agent the window belongs to
    pub agent_id: String,
    /// Slot index
    pub slot: usize,
    /// Offset from the start of the schedule
    pub start_offset_secs: u64,
    /// Window length
    pub duration_secs: u64,
}

/// Record of a detected conflict and how it was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Unique conflict ID
    pub conflict_id: Uuid,
    /// Conflict kind
    pub kind: ConflictKind,
    /// Agents involved
    pub agents: Vec<String>,
    /// Applied resolution
    pub resolution: Resolution,
    /// Contested resource, for file/resource conflicts
    #[serde(default)]
    pub resource: Option<String>,
    /// Adjustment payload per agent
    pub adjustments: BTreeMap<String, Value>,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
}

impl ConflictResolution {
    /// Whether `agent_id` is involved
    #[must_use]
    pub fn involves(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a == agent_id)
    }
}

/// Adjustment delivered to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAdjustment {
    /// Agent that must apply the adjustment
    pub agent_id: String,
    /// Conflict the adjustment resolves
    pub conflict_id: Uuid,
    /// Conflict kind
    pub kind: ConflictKind,
    /// Applied resolution
    pub resolution: Resolution,
    /// What the agent should do
    pub payload: Value,
}

/// Result of a collaboration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationOutcome {
    /// Request identifier
    pub request_id: Uuid,
    /// Whether the request was accepted
    pub accepted: bool,
    /// Why the request was denied
    #[serde(default)]
    pub reason: Option<String>,
    /// Task handed to the receiving agent, for accepted delegations
    #[serde(default)]
    pub delegated_task: Option<crate::task::AgentTask>,
}

impl CollaborationOutcome {
    pub(crate) fn accepted(request_id: Uuid) -> Self {
        Self {
            request_id,
            accepted: true,
            reason: None,
            delegated_task: None,
        }
    }

    pub(crate) fn denied(request_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            accepted: false,
            reason: Some(reason.into()),
            delegated_task: None,
        }
    }
}
