//! CoordinationHub - one coordination context per workspace
//!
//! Owns and wires the registry, coordinator, orchestrator, dispatcher and
//! event bus. Construct one per workspace and pass it (or its parts) to the
//! surfaces that need it.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentConfig, CodingAgent};
use crate::config::CoreConfig;
use crate::coordinator::{
    AgentProfile, CollaborationKind, CollaborationOutcome, CoordinationPlan, CoordinationStrategy,
    Coordinator,
};
use crate::dispatcher::TaskDispatcher;
use crate::error::{Result, RoutingError};
use crate::event_bus::{CoordinationEvent, EventBus};
use crate::orchestrator::Orchestrator;
use crate::registry::AgentRegistry;
use crate::task::{AgentResult, AgentTask};
use crate::transport::Transport;

/// Coordination context for one workspace
pub struct CoordinationHub {
    config: CoreConfig,
    events: EventBus,
    registry: Arc<AgentRegistry>,
    coordinator: Arc<Coordinator>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<TaskDispatcher>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinationHub {
    /// Wire a hub over `transport`. The worker is not started yet.
    pub fn new(config: CoreConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let events = EventBus::default();
        let registry = Arc::new(AgentRegistry::new());
        let coordinator = Arc::new(Coordinator::with_event_bus(
            config.coordinator.clone(),
            events.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.clone(),
            transport,
            coordinator.clone(),
            events.clone(),
        )?);
        orchestrator.install_handlers();

        let dispatcher = Arc::new(TaskDispatcher::new(
            config.queue.clone(),
            registry.clone(),
            coordinator.clone(),
            orchestrator.clone(),
            events.clone(),
        ));

        Ok(Self {
            config,
            events,
            registry,
            coordinator,
            orchestrator,
            dispatcher,
            worker: Mutex::new(None),
        })
    }

    /// Start the dispatcher worker; no-op if already running
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_none() {
            *worker = Some(self.dispatcher.start());
            info!(agents = self.registry.len().await, "Coordination hub started");
        }
    }

    /// Stop the worker, cancel running tasks and shut down every agent
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatcher worker ended abnormally");
            }
        }
        self.registry.shutdown_all().await;
        info!("Coordination hub stopped");
    }

    /// Register and initialize an agent
    pub async fn register_agent(&self, agent: Arc<dyn CodingAgent>, config: AgentConfig) -> Result<()> {
        self.registry.register(agent, config).await
    }

    /// Queue a task
    pub fn submit(&self, task: AgentTask) -> Result<Uuid> {
        self.dispatcher.submit(task)
    }

    /// Run a task now, optionally on a specific agent
    pub async fn execute_immediately(&self, task: AgentTask, agent_id: Option<&str>) -> AgentResult {
        self.dispatcher.execute_immediately(task, agent_id).await
    }

    /// Cooperatively cancel a task; false if it is not tracked
    pub fn cancel(&self, task_id: Uuid) -> bool {
        self.dispatcher.cancel(task_id)
    }

    /// Plan `goal` across registered agents.
    ///
    /// Fails with `AgentNotFound` if an ID is not registered.
    pub async fn coordinate_goal(
        &self,
        agent_ids: &[&str],
        goal: &str,
        strategy: CoordinationStrategy,
    ) -> Result<CoordinationPlan> {
        let mut profiles = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let capabilities = self
                .registry
                .capabilities_of(agent_id)
                .await
                .ok_or_else(|| RoutingError::AgentNotFound(agent_id.to_string()))?;
            profiles.push(AgentProfile::new(*agent_id, capabilities));
        }
        self.coordinator
            .coordinate_parallel_work(&profiles, goal, strategy)
    }

    /// Queue every subtask of `plan`, in plan order
    pub fn submit_plan(&self, plan: &CoordinationPlan) -> Result<Vec<Uuid>> {
        plan.tasks().map(|task| self.submit(task.clone())).collect()
    }

    /// Ask `to` for help on behalf of `from`; accepted delegations are queued.
    pub async fn request_collaboration(
        &self,
        from: &str,
        to: &str,
        kind: CollaborationKind,
        payload: Value,
        priority: u8,
    ) -> Result<CollaborationOutcome> {
        let outcome = self
            .coordinator
            .request_collaboration(from, to, kind, payload, priority)
            .await;
        if let Some(task) = &outcome.delegated_task {
            self.submit(task.clone())?;
        }
        Ok(outcome)
    }

    /// Subscribe to coordination events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    /// Loaded configuration
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Agent registry
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Conflict coordinator
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Child-agent orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Task dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }
}
