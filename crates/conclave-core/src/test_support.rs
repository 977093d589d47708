//! Scripted agents for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::agent::{AgentConfig, CodingAgent, TaskContext};
use crate::intervention::UserIntervention;
use crate::task::{AgentResult, AgentTask, Capability};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    Succeed,
    Fail,
    Error,
    Panic,
    /// Wait for cancellation
    Hang,
    /// Ask for approval and report the answer as output
    AskApproval,
    /// Wait for a conflict adjustment and report its payload as output
    AwaitAdjustment,
}

pub(crate) struct ScriptedAgent {
    id: String,
    capabilities: Vec<Capability>,
    script: Script,
    delay: Duration,
    fail_init: bool,
    pub started: Mutex<Vec<Uuid>>,
    pub cancel_requests: Mutex<Vec<Uuid>>,
    running: AtomicUsize,
    pub peak_running: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(id: &str, capabilities: &[Capability]) -> Self {
        Self {
            id: id.to_string(),
            capabilities: capabilities.to_vec(),
            script: Script::Succeed,
            delay: Duration::ZERO,
            fail_init: false,
            started: Mutex::new(Vec::new()),
            cancel_requests: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn started(&self) -> Vec<Uuid> {
        self.started.lock().unwrap().clone()
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CodingAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn initialize(&self, _config: &AgentConfig) -> anyhow::Result<()> {
        if self.fail_init {
            anyhow::bail!("missing API key");
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    async fn execute_task(&self, task: &AgentTask, ctx: TaskContext) -> anyhow::Result<AgentResult> {
        self.started.lock().unwrap().push(task.id);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        ctx.log(format!("{} picked up {}", self.id, task.task_type)).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.script {
            Script::Succeed => {
                ctx.report_progress(1.0, "done").await;
                Ok(AgentResult::success(task.id, format!("{} done", self.id)))
            }
            Script::Fail => Ok(AgentResult::failure(task.id, "tests failed")),
            Script::Error => anyhow::bail!("agent crashed"),
            Script::Panic => panic!("agent panicked"),
            Script::Hang => {
                ctx.report_progress(0.5, "halfway").await;
                ctx.add_artifact("partial", serde_json::json!("half a patch"))
                    .await;
                ctx.cancelled().await;
                Ok(AgentResult::cancelled(task.id))
            }
            Script::AskApproval => {
                let answer = ctx
                    .request_intervention(UserIntervention::approval("create auth.py?"))
                    .await;
                Ok(AgentResult::success(task.id, format!("{answer:?}")))
            }
            Script::AwaitAdjustment => loop {
                if let Some(adjustment) = ctx.adjustments().await.into_iter().next() {
                    return Ok(AgentResult::success(task.id, adjustment.payload.to_string()));
                }
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(AgentResult::cancelled(task.id)),
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            },
        }
    }

    async fn cancel_task(&self, task_id: Uuid) -> bool {
        self.cancel_requests.lock().unwrap().push(task_id);
        true
    }
}
