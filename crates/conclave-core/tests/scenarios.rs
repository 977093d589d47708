//! End-to-end coordination scenarios

use async_trait::async_trait;
use conclave_core::{
    AgentConfig, AgentResult, AgentTask, Capability, CodingAgent, ConflictKind, CoordinationHub,
    Coordinator, CoordinatorConfig, CoreConfig, EventBus, InterventionHandler,
    InterventionResponse, LoopbackTransport, Orchestrator, OrchestratorConfig, Resolution,
    TaskContext, UserIntervention,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Work,
    Block,
    Ask,
}

struct FakeAgent {
    id: String,
    capabilities: Vec<Capability>,
    mode: Mode,
    started: Mutex<Vec<Uuid>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeAgent {
    fn new(id: &str, capabilities: &[Capability], mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            capabilities: capabilities.to_vec(),
            mode,
            started: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn started(&self) -> Vec<Uuid> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodingAgent for FakeAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn initialize(&self, _config: &AgentConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute_task(&self, task: &AgentTask, ctx: TaskContext) -> anyhow::Result<AgentResult> {
        self.started.lock().unwrap().push(task.id);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match self.mode {
            Mode::Work => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                AgentResult::success(task.id, format!("{} reviewed", self.id))
            }
            Mode::Block => {
                ctx.cancelled().await;
                AgentResult::cancelled(task.id)
            }
            Mode::Ask => {
                let answer = ctx
                    .request_intervention(UserIntervention::approval("Delete generated file?"))
                    .await;
                match answer {
                    Some(InterventionResponse::Approved) => AgentResult::success(task.id, "deleted"),
                    _ => AgentResult::failure(task.id, "not approved"),
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

fn collect_results(hub: &CoordinationHub) -> mpsc::UnboundedReceiver<AgentResult> {
    let (tx, rx) = mpsc::unbounded_channel();
    hub.dispatcher().on_completion(move |result| {
        tx.send(result.clone())?;
        Ok(())
    });
    rx
}

fn hub() -> CoordinationHub {
    CoordinationHub::new(CoreConfig::default(), Arc::new(LoopbackTransport::new())).unwrap()
}

fn review() -> AgentTask {
    AgentTask::new("review", "review pull request").with_capability(Capability::CodeReview)
}

#[tokio::test]
async fn shared_source_file_is_split_into_ordered_sections() {
    let coordinator = Coordinator::new(CoordinatorConfig::default());
    let x_task = AgentTask::new("implement", "login").with_priority(8);
    let y_task = AgentTask::new("implement", "signup").with_priority(5);
    let auth = vec!["auth.py".to_string()];

    assert!(coordinator.register_task("x", &x_task, &auth, &[]).await.is_empty());
    let conflicts = coordinator.register_task("y", &y_task, &auth, &[]).await;

    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::File);
    assert_eq!(conflict.resolution, Resolution::SequentialSections);
    assert_eq!(conflict.adjustments.len(), 2);

    let x = &conflict.adjustments["x"];
    let y = &conflict.adjustments["y"];
    assert_ne!(x["section"], y["section"]);
    assert_eq!(y["wait_for"], json!("x"));
    assert_eq!(x["wait_for"], Value::Null);

    // single owner; the other claim waits
    assert_eq!(coordinator.owner_of("auth.py").await.unwrap().agent_id, "x");
}

#[tokio::test]
async fn single_reviewer_runs_tasks_one_at_a_time_in_order() {
    let hub = hub();
    let reviewer = FakeAgent::new("reviewer", &[Capability::CodeReview], Mode::Work);
    let writer = FakeAgent::new("writer", &[Capability::CodeGeneration], Mode::Work);
    hub.register_agent(reviewer.clone(), AgentConfig::default()).await.unwrap();
    hub.register_agent(writer.clone(), AgentConfig::default()).await.unwrap();
    let mut results = collect_results(&hub);

    let submitted: Vec<Uuid> = (0..3).map(|_| hub.submit(review()).unwrap()).collect();
    hub.start().await;

    let mut completed = Vec::new();
    for _ in 0..3 {
        let result = results.recv().await.unwrap();
        assert!(result.success);
        completed.push(result.task_id);
    }

    assert_eq!(completed, submitted);
    assert_eq!(reviewer.started(), submitted);
    assert_eq!(reviewer.peak.load(Ordering::SeqCst), 1);
    assert!(writer.started().is_empty());
    hub.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_intervention_times_out_after_its_deadline() {
    let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default()));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(LoopbackTransport::new()),
        coordinator,
        EventBus::default(),
    )
    .unwrap();

    let intervention =
        UserIntervention::approval("Overwrite config?").with_timeout(Duration::from_secs(1));
    let started = tokio::time::Instant::now();
    let response = orchestrator.handle_intervention("agent-a", intervention).await;
    let waited = started.elapsed();

    assert_eq!(response, None);
    assert!(waited >= Duration::from_secs(1));
    assert!(waited < Duration::from_millis(1100));
    assert!(orchestrator.pending_interventions().is_empty());
}

#[tokio::test]
async fn cancelling_an_unknown_task_returns_false() {
    let hub = hub();
    assert!(!hub.cancel(Uuid::new_v4()));
}

#[tokio::test]
async fn idle_agent_wins_over_busy_one() {
    let hub = hub();
    let busy = FakeAgent::new("a", &[Capability::CodeReview], Mode::Block);
    let idle = FakeAgent::new("b", &[Capability::CodeReview], Mode::Block);
    hub.register_agent(busy.clone(), AgentConfig::default().with_max_concurrent_tasks(2))
        .await
        .unwrap();
    hub.register_agent(idle.clone(), AgentConfig::default()).await.unwrap();
    hub.start().await;

    let pinned: Vec<Uuid> = (0..2)
        .map(|_| hub.submit(review().pinned_to("a")).unwrap())
        .collect();
    while busy.started().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(hub.registry().load_of("a").await, 2);

    let selected = hub.registry().select_agent(&review()).await.unwrap();
    assert_eq!(selected.id(), "b");

    let task = review();
    let task_id = task.id;
    hub.submit(task).unwrap();
    while idle.started().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(idle.started(), vec![task_id]);
    assert_eq!(busy.started(), pinned);

    hub.shutdown().await;
}

struct Approver(AtomicUsize);

#[async_trait]
impl InterventionHandler for Approver {
    async fn handle(&self, _intervention: &UserIntervention) -> anyhow::Result<Option<InterventionResponse>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Some(InterventionResponse::Approved))
    }
}

#[tokio::test]
async fn local_agent_interventions_reach_registered_handlers() {
    let hub = hub();
    let agent = FakeAgent::new("cleaner", &[Capability::Refactoring], Mode::Ask);
    hub.register_agent(agent, AgentConfig::default()).await.unwrap();
    let approver = Arc::new(Approver(AtomicUsize::new(0)));
    hub.orchestrator().register_intervention_handler(approver.clone());

    let task = AgentTask::new("cleanup", "remove stale output").with_capability(Capability::Refactoring);
    let result = hub.execute_immediately(task, None).await;

    assert_eq!(result.output, "deleted");
    assert_eq!(approver.0.load(Ordering::SeqCst), 1);
    assert_eq!(result.interventions.len(), 1);
    assert_eq!(
        result.interventions[0].resolution(),
        Some(&InterventionResponse::Approved)
    );
}
