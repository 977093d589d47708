//! Agent execution contract
//!
//! Any coding agent (CLI wrapper, remote pane, in-process model) plugs into
//! the core by implementing [`CodingAgent`]. The core treats it as a
//! capability-tagged black box; while running a task the agent talks back
//! through the [`TaskContext`] it was handed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::AgentAdjustment;
use crate::intervention::{InterventionResponse, UserIntervention};
use crate::task::{AgentResult, AgentTask, Capability, TaskStatus};

/// Per-agent settings passed to [`CodingAgent::initialize`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tasks the agent may run at once; extra tasks wait in its lane (FIFO)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Agent-specific settings (model, workspace, CLI flags)
    #[serde(default)]
    pub settings: HashMap<String, Value>,
}

fn default_max_concurrent_tasks() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            settings: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// Allow `n` concurrent tasks (at least one)
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    /// Add a setting
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

/// Pluggable coding agent
#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Unique agent ID
    fn id(&self) -> &str;

    /// Implementation kind (e.g., "claude", "reviewer")
    fn agent_type(&self) -> &str {
        "generic"
    }

    /// Advertised capabilities
    fn capabilities(&self) -> &[Capability];

    /// Prepare the agent. An error keeps the agent out of routing.
    async fn initialize(&self, config: &AgentConfig) -> anyhow::Result<()>;

    /// Release agent resources
    async fn shutdown(&self) {}

    /// Run a task to completion. Errors become a failed [`AgentResult`].
    async fn execute_task(&self, task: &AgentTask, ctx: TaskContext)
        -> anyhow::Result<AgentResult>;

    /// Cooperatively cancel a running task
    async fn cancel_task(&self, _task_id: Uuid) -> bool {
        false
    }

    /// Agent-side status of a task
    async fn task_status(&self, _task_id: Uuid) -> Option<TaskStatus> {
        None
    }

    /// Agent-side progress of a task, 0.0-1.0
    async fn task_progress(&self, _task_id: Uuid) -> Option<f32> {
        None
    }
}

/// Core side of the agent callback contract
#[async_trait]
pub trait TaskReporter: Send + Sync {
    /// Progress from a running task
    async fn report_progress(&self, agent_id: &str, task_id: Uuid, progress: f32, message: &str);

    /// Ask for a human decision; `None` on timeout or no decision
    async fn request_intervention(
        &self,
        agent_id: &str,
        intervention: UserIntervention,
    ) -> Option<InterventionResponse>;
}

/// Reporter that drops progress and never answers interventions
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

#[async_trait]
impl TaskReporter for NoopReporter {
    async fn report_progress(&self, _agent_id: &str, _task_id: Uuid, _progress: f32, _message: &str) {}

    async fn request_intervention(
        &self,
        _agent_id: &str,
        _intervention: UserIntervention,
    ) -> Option<InterventionResponse> {
        None
    }
}

/// Output recorded through a [`TaskContext`] while the task runs
#[derive(Debug, Default, Clone)]
pub(crate) struct TaskJournal {
    pub logs: Vec<String>,
    pub artifacts: HashMap<String, Value>,
    pub interventions: Vec<UserIntervention>,
    pub progress: Option<f32>,
}

impl TaskJournal {
    /// Fold recorded output into a result produced by the agent or the core.
    pub(crate) fn merge_into(self, result: AgentResult) -> AgentResult {
        let mut logs = self.logs;
        logs.extend(result.logs.iter().cloned());
        let recorded: Vec<Uuid> = result.interventions.iter().map(|i| i.id).collect();
        let extra: Vec<UserIntervention> = self
            .interventions
            .into_iter()
            .filter(|i| !recorded.contains(&i.id))
            .collect();

        AgentResult {
            logs: Vec::new(),
            ..result
        }
        .with_logs(logs)
        .with_artifacts(self.artifacts)
        .with_interventions(extra)
    }
}

/// Handle given to an agent for the duration of one task
#[derive(Clone)]
pub struct TaskContext {
    agent_id: String,
    task_id: Uuid,
    allow_intervention: bool,
    reporter: Arc<dyn TaskReporter>,
    cancel: CancellationToken,
    journal: Arc<Mutex<TaskJournal>>,
    adjustments: Arc<Mutex<mpsc::UnboundedReceiver<AgentAdjustment>>>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("agent_id", &self.agent_id)
            .field("task_id", &self.task_id)
            .field("allow_intervention", &self.allow_intervention)
            .finish()
    }
}

impl TaskContext {
    /// Create a context for `task` running on `agent_id`
    pub fn new(
        agent_id: impl Into<String>,
        task: &AgentTask,
        reporter: Arc<dyn TaskReporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task.id,
            allow_intervention: task.allow_intervention,
            reporter,
            cancel,
            journal: Arc::new(Mutex::new(TaskJournal::default())),
            adjustments: Arc::new(Mutex::new(mpsc::unbounded_channel().1)),
        }
    }

    /// Attach the feed that conflict adjustments for this task arrive on
    #[must_use]
    pub fn with_adjustments(mut self, feed: mpsc::UnboundedReceiver<AgentAdjustment>) -> Self {
        self.adjustments = Arc::new(Mutex::new(feed));
        self
    }

    /// Agent running the task
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Task being run
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Conflict adjustments delivered since the last call.
    ///
    /// An agent sharing resources with other agents should check this
    /// between steps and follow each adjustment's payload (its section,
    /// time slot or `wait_for` agent).
    pub async fn adjustments(&self) -> Vec<AgentAdjustment> {
        let mut feed = self.adjustments.lock().await;
        let mut delivered = Vec::new();
        while let Ok(adjustment) = feed.try_recv() {
            delivered.push(adjustment);
        }
        delivered
    }

    /// Record a log line; kept even if the task is later cancelled
    pub async fn log(&self, line: impl Into<String>) {
        self.journal.lock().await.logs.push(line.into());
    }

    /// Record an artifact; kept even if the task is later cancelled
    pub async fn add_artifact(&self, name: impl Into<String>, value: Value) {
        self.journal.lock().await.artifacts.insert(name.into(), value);
    }

    /// Report progress (clamped to 0.0-1.0)
    pub async fn report_progress(&self, progress: f32, message: impl Into<String>) {
        let progress = progress.clamp(0.0, 1.0);
        let message = message.into();
        {
            let mut journal = self.journal.lock().await;
            journal.progress = Some(progress);
            journal
                .logs
                .push(format!("[{:>3.0}%] {}", progress * 100.0, message));
        }
        self.reporter
            .report_progress(&self.agent_id, self.task_id, progress, &message)
            .await;
    }

    /// Ask for a human decision.
    ///
    /// Returns `None` immediately when the task forbids interventions, and
    /// `None` when the request times out.
    pub async fn request_intervention(
        &self,
        intervention: UserIntervention,
    ) -> Option<InterventionResponse> {
        if !self.allow_intervention {
            tracing::debug!(
                agent_id = %self.agent_id,
                task_id = %self.task_id,
                "Intervention suppressed, task does not allow interventions"
            );
            return None;
        }

        let mut record = intervention.for_task(self.task_id);
        let response = self
            .reporter
            .request_intervention(&self.agent_id, record.clone())
            .await;

        if let Some(response) = &response {
            record.resolve(response.clone());
        }
        self.journal.lock().await.interventions.push(record);
        response
    }

    /// Last reported progress
    pub async fn progress(&self) -> Option<f32> {
        self.journal.lock().await.progress
    }

    pub(crate) async fn take_journal(&self) -> TaskJournal {
        std::mem::take(&mut *self.journal.lock().await)
    }
}
