use super::*;
use crate::agent::{AgentConfig, NoopReporter};
use crate::coordinator::CoordinatorConfig;
use crate::task::Capability;
use crate::test_support::{Script, ScriptedAgent};
use std::sync::atomic::Ordering;
use std::time::Duration;

struct Harness {
    dispatcher: Arc<TaskDispatcher>,
    registry: Arc<AgentRegistry>,
    coordinator: Arc<Coordinator>,
    results: mpsc::UnboundedReceiver<AgentResult>,
}

impl Harness {
    async fn next_result(&mut self) -> AgentResult {
        self.results.recv().await.unwrap()
    }
}

async fn harness(agents: Vec<(Arc<ScriptedAgent>, AgentConfig)>) -> Harness {
    let registry = Arc::new(AgentRegistry::new());
    for (agent, config) in agents {
        registry.register(agent, config).await.unwrap();
    }
    let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default()));
    let queue = QueueConfig {
        poll_interval_ms: 20,
        ..QueueConfig::default()
    };
    let dispatcher = Arc::new(TaskDispatcher::new(
        queue,
        registry.clone(),
        coordinator.clone(),
        Arc::new(NoopReporter),
        EventBus::default(),
    ));

    let (tx, results) = mpsc::unbounded_channel();
    dispatcher.on_completion(move |result| {
        tx.send(result.clone())?;
        Ok(())
    });

    Harness {
        dispatcher,
        registry,
        coordinator,
        results,
    }
}

fn review() -> AgentTask {
    AgentTask::new("review", "review the diff").with_capability(Capability::CodeReview)
}

#[tokio::test(start_paused = true)]
async fn test_single_lane_runs_in_submission_order() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_delay(Duration::from_millis(100))
        .arc();
    let mut h = harness(vec![(agent.clone(), AgentConfig::default())]).await;

    let ids: Vec<Uuid> = (0..3)
        .map(|_| h.dispatcher.submit(review()).unwrap())
        .collect();
    let worker = h.dispatcher.start();

    let mut finished = Vec::new();
    for _ in 0..3 {
        let result = h.next_result().await;
        assert!(result.success, "{:?}", result.error);
        finished.push(result.task_id);
    }

    assert_eq!(finished, ids);
    assert_eq!(agent.started(), ids);
    assert_eq!(agent.peak_running.load(Ordering::SeqCst), 1);
    assert_eq!(h.registry.load_of("reviewer").await, 0);
    assert_eq!(h.dispatcher.in_flight(), 0);

    h.dispatcher.shutdown();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_lane_honours_concurrency_limit() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_delay(Duration::from_millis(100))
        .arc();
    let config = AgentConfig::default().with_max_concurrent_tasks(2);
    let mut h = harness(vec![(agent.clone(), config)]).await;

    for _ in 0..3 {
        h.dispatcher.submit(review()).unwrap();
    }
    let _worker = h.dispatcher.start();
    for _ in 0..3 {
        assert!(h.next_result().await.success);
    }
    assert_eq!(agent.peak_running.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unroutable_task_fails_immediately() {
    let agent = ScriptedAgent::new("writer", &[Capability::CodeGeneration]).arc();
    let mut h = harness(vec![(agent.clone(), AgentConfig::default())]).await;

    let task = AgentTask::new("deploy", "ship").with_capability(Capability::Deployment);
    let task_id = h.dispatcher.submit(task).unwrap();
    let _worker = h.dispatcher.start();

    let result = h.next_result().await;
    assert_eq!(result.task_id, task_id);
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("no eligible agent"));
    assert!(agent.started().is_empty());
}

#[tokio::test]
async fn test_agent_error_becomes_failed_result() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_script(Script::Error)
        .arc();
    let h = harness(vec![(agent, AgentConfig::default())]).await;

    let task = review().with_resource("auth.py");
    let result = h.dispatcher.execute_immediately(task, None).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("agent crashed"));
    assert_eq!(result.terminal_status(), TaskStatus::Failed);
    assert!(result.logs.iter().any(|l| l.contains("picked up review")));
    assert!(h.coordinator.owner_of("auth.py").await.is_none());
    assert_eq!(h.registry.load_of("reviewer").await, 0);
}

#[tokio::test]
async fn test_agent_panic_is_captured() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_script(Script::Panic)
        .arc();
    let h = harness(vec![(agent, AgentConfig::default())]).await;

    let result = h.dispatcher.execute_immediately(review(), None).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("agent panicked: agent panicked"));
    assert_eq!(h.dispatcher.in_flight(), 0);
    assert_eq!(h.registry.load_of("reviewer").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_partial_output() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_script(Script::Hang)
        .arc();
    let h = harness(vec![(agent.clone(), AgentConfig::default())]).await;

    let task = review().with_timeout(Duration::from_secs(1));
    let task_id = task.id;
    let result = h.dispatcher.execute_immediately(task, None).await;

    assert_eq!(result.error.as_deref(), Some("timed out"));
    assert_eq!(result.terminal_status(), TaskStatus::Failed);
    assert!(result.artifacts.contains_key("partial"));
    assert!(result.execution_time_ms >= 1000);
    assert_eq!(*agent.cancel_requests.lock().unwrap(), vec![task_id]);
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_timeout_is_honoured() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_script(Script::Hang)
        .arc();
    let h = harness(vec![(agent, AgentConfig::default())]).await;

    let started = tokio::time::Instant::now();
    let result = h
        .dispatcher
        .execute_immediately(review().with_timeout(Duration::from_millis(300)), None)
        .await;

    assert_eq!(result.error.as_deref(), Some("timed out"));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_cancel_running_task() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_script(Script::Hang)
        .arc();
    let mut h = harness(vec![(agent.clone(), AgentConfig::default())]).await;

    let task_id = h.dispatcher.submit(review()).unwrap();
    let _worker = h.dispatcher.start();
    while agent.started().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(h.dispatcher.task_status(task_id).await, Some(TaskStatus::Running));
    assert!(h.dispatcher.cancel(task_id));

    let result = h.next_result().await;
    assert!(result.is_cancelled());
    assert!(result.artifacts.contains_key("partial"));
    assert!(result.logs.iter().any(|l| l.contains("halfway")));
    assert_eq!(*agent.cancel_requests.lock().unwrap(), vec![task_id]);
    assert!(!h.dispatcher.cancel(task_id));
}

#[tokio::test]
async fn test_cancel_untracked_task() {
    let h = harness(Vec::new()).await;
    assert!(!h.dispatcher.cancel(Uuid::new_v4()));
    assert_eq!(h.dispatcher.task_status(Uuid::new_v4()).await, None);
    assert_eq!(h.dispatcher.task_progress(Uuid::new_v4()).await, None);
}

#[tokio::test]
async fn test_execute_immediately_pinned() {
    let first = ScriptedAgent::new("first", &[Capability::CodeReview]).arc();
    let second = ScriptedAgent::new("second", &[Capability::CodeReview]).arc();
    let h = harness(vec![
        (first.clone(), AgentConfig::default()),
        (second.clone(), AgentConfig::default()),
    ])
    .await;

    let result = h.dispatcher.execute_immediately(review(), Some("second")).await;
    assert_eq!(result.output, "second done");
    assert!(first.started().is_empty());

    let result = h.dispatcher.execute_immediately(review(), Some("ghost")).await;
    assert_eq!(result.error.as_deref(), Some("agent 'ghost' not found"));
}

#[tokio::test]
async fn test_intervention_unanswered_without_reporter() {
    let agent = ScriptedAgent::new("writer", &[Capability::CodeGeneration])
        .with_script(Script::AskApproval)
        .arc();
    let h = harness(vec![(agent, AgentConfig::default())]).await;

    let task = AgentTask::new("implement", "auth").with_capability(Capability::CodeGeneration);
    let result = h.dispatcher.execute_immediately(task, None).await;

    assert_eq!(result.output, "None");
    assert_eq!(result.interventions.len(), 1);
    assert!(!result.interventions[0].is_resolved());
}

#[tokio::test]
async fn test_shutdown_stops_worker() {
    let h = harness(Vec::new()).await;
    let worker = h.dispatcher.start();
    h.dispatcher.shutdown();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_both_agents_receive_their_adjustment() {
    let x = ScriptedAgent::new("x", &[Capability::CodeGeneration])
        .with_script(Script::AwaitAdjustment)
        .arc();
    let y = ScriptedAgent::new("y", &[Capability::CodeGeneration])
        .with_script(Script::AwaitAdjustment)
        .arc();
    let mut h = harness(vec![
        (x.clone(), AgentConfig::default()),
        (y.clone(), AgentConfig::default()),
    ])
    .await;

    let login = AgentTask::new("implement", "login")
        .with_capability(Capability::CodeGeneration)
        .with_resource("auth.py")
        .with_priority(8)
        .pinned_to("x");
    let logout = AgentTask::new("implement", "logout")
        .with_capability(Capability::CodeGeneration)
        .with_resource("auth.py")
        .with_priority(3)
        .pinned_to("y");
    let (login_id, logout_id) = (login.id, logout.id);
    h.dispatcher.submit(login).unwrap();
    h.dispatcher.submit(logout).unwrap();
    let _worker = h.dispatcher.start();

    let mut payloads = std::collections::HashMap::new();
    for _ in 0..2 {
        let result = h.next_result().await;
        assert!(result.success, "{:?}", result.error);
        let payload: serde_json::Value = serde_json::from_str(&result.output).unwrap();
        payloads.insert(result.task_id, payload);
    }

    assert_eq!(payloads[&login_id]["section"], 0);
    assert!(payloads[&login_id]["wait_for"].is_null());
    assert_eq!(payloads[&logout_id]["section"], 1);
    assert_eq!(payloads[&logout_id]["wait_for"], "x");

    // Nothing is left behind once both agents are idle
    assert!(h.coordinator.take_adjustments("x").await.is_empty());
    assert!(h.coordinator.take_adjustments("y").await.is_empty());
}

#[tokio::test]
async fn test_task_id_already_in_flight_is_rejected() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview])
        .with_script(Script::Hang)
        .arc();
    let mut h = harness(vec![(agent.clone(), AgentConfig::default())]).await;

    let task = review();
    let task_id = task.id;
    // Queued twice before the worker runs: only one copy executes
    h.dispatcher.submit(task.clone()).unwrap();
    h.dispatcher.submit(task.clone()).unwrap();
    let _worker = h.dispatcher.start();
    while agent.started().is_empty() || h.dispatcher.queued() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(matches!(
        h.dispatcher.submit(task.clone()),
        Err(Error::DuplicateTask(id)) if id == task_id
    ));
    let duplicate = h.dispatcher.execute_immediately(task, None).await;
    assert_eq!(
        duplicate.error.as_deref(),
        Some(format!("task {task_id} is already in flight").as_str())
    );
    assert_eq!(h.dispatcher.in_flight(), 1);
    assert_eq!(h.registry.load_of("reviewer").await, 1);

    assert!(h.dispatcher.cancel(task_id));
    assert!(h.next_result().await.is_cancelled());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.results.try_recv().is_err());
    assert_eq!(agent.started(), vec![task_id]);
    assert_eq!(h.dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_no_work_accepted_after_shutdown() {
    let agent = ScriptedAgent::new("reviewer", &[Capability::CodeReview]).arc();
    let h = harness(vec![(agent.clone(), AgentConfig::default())]).await;
    h.dispatcher.shutdown();

    assert!(matches!(h.dispatcher.submit(review()), Err(Error::ShutDown)));
    assert_eq!(h.dispatcher.queued(), 0);

    let result = h.dispatcher.execute_immediately(review(), None).await;
    assert_eq!(result.error.as_deref(), Some("task dispatcher is shut down"));
    assert!(agent.started().is_empty());
}
