//! Coordinator - conflict detection and resolution across agents
//!
//! Records each task's resource claims and dependencies, detects conflicts
//! between agents (file, resource, dependency, logical, timing) and applies a
//! fixed resolution per kind. Resolutions land in a bounded history; each
//! agent's share is pushed to the adjustment observers as it is produced and
//! kept in a per-agent inbox until the agent has no active task left.
//!
//! The claim map holds exactly one owner per resource. Contested claims queue
//! behind the owner and are promoted, in claim order, when it releases.

use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event_bus::{CoordinationEvent, EventBus};
use crate::observers::ObserverRegistry;
use crate::task::AgentTask;

pub mod collaboration;
mod detection;
pub mod planning;
mod resolution;
pub mod types;

pub use planning::{AgentProfile, CoordinationPlan, CoordinationStrategy, PlannedSubtask};
pub use types::{
    AgentAdjustment, CollaborationKind, CollaborationOutcome, ConflictKind, ConflictResolution,
    CoordinatorConfig, DenyRule, Resolution, ResourceClaim, TimeSlot,
};

/// A task as the coordinator sees it
#[derive(Debug, Clone)]
pub(crate) struct TrackedTask {
    pub task_id: Uuid,
    pub agent_id: String,
    pub task_type: String,
    pub parent_id: Option<Uuid>,
    pub priority: u8,
    pub resources: Vec<String>,
    pub dependencies: Vec<Uuid>,
    pub sequence: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CoordinatorState {
    next_sequence: u64,
    /// Active (non-terminal) tasks
    pub tasks: HashMap<Uuid, TrackedTask>,
    /// resource → owner
    pub claims: HashMap<String, ResourceClaim>,
    /// resource → queued claims, claim order
    pub contenders: HashMap<String, VecDeque<ResourceClaim>>,
    /// Installed time-slice schedules
    pub schedules: HashMap<String, Vec<TimeSlot>>,
    history: VecDeque<ConflictResolution>,
    inbox: HashMap<String, Vec<AgentAdjustment>>,
    pub agent_info: HashMap<String, Map<String, Value>>,
}

impl CoordinatorState {
    pub(crate) fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Highest priority among an agent's active tasks (0 when it has none)
    pub(crate) fn agent_priority(&self, agent_id: &str) -> u8 {
        self.tasks
            .values()
            .filter(|t| t.agent_id == agent_id)
            .map(|t| t.priority)
            .max()
            .unwrap_or(0)
    }

    /// Owner and queued agents of `resource`
    pub(crate) fn holders(&self, resource: &str) -> Vec<String> {
        let owner = self.claims.get(resource).into_iter();
        let queued = self.contenders.get(resource).into_iter().flatten();
        owner.chain(queued).map(|c| c.agent_id.clone()).collect()
    }

    /// Append to history and the inboxes; returns the adjustments to deliver.
    fn record(&mut self, resolution: &ConflictResolution, limit: usize) -> Vec<AgentAdjustment> {
        let limit = limit.max(1);
        let mut produced = Vec::with_capacity(resolution.adjustments.len());
        for (agent_id, payload) in &resolution.adjustments {
            let adjustment = AgentAdjustment {
                agent_id: agent_id.clone(),
                conflict_id: resolution.conflict_id,
                kind: resolution.kind,
                resolution: resolution.resolution,
                payload: payload.clone(),
            };
            let inbox = self.inbox.entry(agent_id.clone()).or_default();
            inbox.push(adjustment.clone());
            if inbox.len() > limit {
                inbox.drain(..inbox.len() - limit);
            }
            produced.push(adjustment);
        }
        self.history.push_back(resolution.clone());
        while self.history.len() > limit {
            self.history.pop_front();
        }
        produced
    }

    /// Drop the owner of `resource` and promote the earliest queued claim.
    pub(crate) fn release_claim(&mut self, resource: &str) -> Option<ResourceClaim> {
        self.claims.remove(resource)?;
        let next = self
            .contenders
            .get_mut(resource)
            .and_then(VecDeque::pop_front);
        match next {
            Some(claim) => {
                debug!(resource, agent_id = %claim.agent_id, "Queued claim promoted");
                self.claims.insert(resource.to_string(), claim.clone());
                if self.contenders.get(resource).is_some_and(VecDeque::is_empty) {
                    self.contenders.remove(resource);
                    self.schedules.remove(resource);
                }
                Some(claim)
            }
            None => {
                self.contenders.remove(resource);
                self.schedules.remove(resource);
                None
            }
        }
    }
}

/// Conflict detection and resolution engine
pub struct Coordinator {
    config: CoordinatorConfig,
    state: RwLock<CoordinatorState>,
    events: EventBus,
    adjustment_observers: ObserverRegistry<AgentAdjustment>,
}

impl Coordinator {
    /// Create a coordinator with its own event bus
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_event_bus(config, EventBus::default())
    }

    /// Create a coordinator publishing to `events`
    #[must_use]
    pub fn with_event_bus(config: CoordinatorConfig, events: EventBus) -> Self {
        Self {
            config,
            state: RwLock::new(CoordinatorState::default()),
            events,
            adjustment_observers: ObserverRegistry::new("adjustment"),
        }
    }

    /// Receive every adjustment as soon as its conflict is resolved.
    ///
    /// Observers run after the coordinator's lock is released.
    pub fn on_adjustment<F>(&self, observer: F)
    where
        F: Fn(&AgentAdjustment) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.adjustment_observers.register(observer);
    }

    /// Coordinator settings
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Record `task` for `agent_id`, claim its resources and resolve any conflicts.
    ///
    /// Detection and claiming happen under one write guard, so two concurrent
    /// registrations can never both see a resource as free.
    pub async fn register_task(
        &self,
        agent_id: &str,
        task: &AgentTask,
        resources: &[String],
        dependencies: &[Uuid],
    ) -> Vec<ConflictResolution> {
        let (resolutions, adjustments) = {
            let mut state = self.state.write().await;
            if state.tasks.contains_key(&task.id) {
                debug!(task_id = %task.id, "Task already registered with coordinator");
                return Vec::new();
            }

            let mut unique_resources: Vec<String> = Vec::with_capacity(resources.len());
            for resource in resources {
                if !unique_resources.contains(resource) {
                    unique_resources.push(resource.clone());
                }
            }

            let tracked = TrackedTask {
                task_id: task.id,
                agent_id: agent_id.to_string(),
                task_type: task.task_type.clone(),
                parent_id: task.parent_id,
                priority: task.priority,
                resources: unique_resources,
                dependencies: dependencies.to_vec(),
                sequence: state.next_sequence(),
            };
            state.tasks.insert(task.id, tracked.clone());

            let detected = detection::claim_and_detect(&mut state, &self.config, &tracked);
            let mut resolutions = Vec::with_capacity(detected.len());
            let mut adjustments = Vec::new();
            for conflict in detected {
                if let Some(resolution) = resolution::resolve(&mut state, &self.config, conflict) {
                    adjustments.extend(state.record(&resolution, self.config.history_limit));
                    resolutions.push(resolution);
                }
            }
            (resolutions, adjustments)
        };

        debug!(task_id = %task.id, agent_id, conflicts = resolutions.len(), "Task registered");
        for resolution in &resolutions {
            self.announce(resolution);
        }
        self.deliver(&adjustments);
        resolutions
    }

    /// Forget a task that reached a terminal status and release its claims.
    ///
    /// Returns the resources whose ownership changed.
    pub async fn release_task(&self, task_id: Uuid) -> Vec<String> {
        let mut state = self.state.write().await;
        let Some(released) = state.tasks.remove(&task_id) else {
            return Vec::new();
        };
        if !state.tasks.values().any(|t| t.agent_id == released.agent_id) {
            state.inbox.remove(&released.agent_id);
        }

        for queue in state.contenders.values_mut() {
            queue.retain(|c| c.task_id != task_id);
        }
        state.contenders.retain(|_, queue| !queue.is_empty());

        let mut owned: Vec<String> = state
            .claims
            .iter()
            .filter(|(_, claim)| claim.task_id == task_id)
            .map(|(resource, _)| resource.clone())
            .collect();
        owned.sort();
        for resource in &owned {
            state.release_claim(resource);
        }

        debug!(task_id = %task_id, released = owned.len(), "Task claims released");
        owned
    }

    /// Release a claim held by `agent_id` outside of a task (e.g. a collaboration lock),
    /// or withdraw its queued claim. Returns false if it held neither.
    pub async fn release_resource(&self, agent_id: &str, resource: &str) -> bool {
        let mut state = self.state.write().await;
        let owns = state
            .claims
            .get(resource)
            .is_some_and(|c| c.agent_id == agent_id);
        if owns {
            state.release_claim(resource);
            return true;
        }

        let Some(queue) = state.contenders.get_mut(resource) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|c| c.agent_id != agent_id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            state.contenders.remove(resource);
        }
        removed
    }

    /// Drain the adjustments still held for `agent_id`.
    ///
    /// The inbox is cleared once the agent has no active task.
    pub async fn take_adjustments(&self, agent_id: &str) -> Vec<AgentAdjustment> {
        self.state
            .write()
            .await
            .inbox
            .remove(agent_id)
            .unwrap_or_default()
    }

    /// Recorded resolutions, oldest first
    pub async fn history(&self) -> Vec<ConflictResolution> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Resolutions involving `agent_id`, oldest first
    pub async fn history_for(&self, agent_id: &str) -> Vec<ConflictResolution> {
        self.state
            .read()
            .await
            .history
            .iter()
            .filter(|r| r.involves(agent_id))
            .cloned()
            .collect()
    }

    /// Existing resolution between two agents, or one detected now from current claims.
    pub async fn conflicts_between(&self, a: &str, b: &str) -> Option<ConflictResolution> {
        let (resolution, adjustments) = {
            let mut state = self.state.write().await;
            if let Some(existing) = state
                .history
                .iter()
                .rev()
                .find(|r| r.involves(a) && r.involves(b))
            {
                return Some(existing.clone());
            }

            let detected = detection::detect_between(&state, &self.config, a, b)?;
            let resolution = resolution::resolve(&mut state, &self.config, detected)?;
            let adjustments = state.record(&resolution, self.config.history_limit);
            (resolution, adjustments)
        };

        self.announce(&resolution);
        self.deliver(&adjustments);
        Some(resolution)
    }

    /// Active task IDs in an order that respects declared dependencies.
    ///
    /// Ready tasks go highest priority first, then registration order. Tasks
    /// caught in a dependency cycle are appended in the same order.
    pub async fn execution_order(&self) -> Vec<Uuid> {
        let state = self.state.read().await;
        let mut tasks: Vec<&TrackedTask> = state.tasks.values().collect();
        tasks.sort_by_key(|t| (Reverse(t.priority), t.sequence));

        let mut done: HashSet<Uuid> = HashSet::with_capacity(tasks.len());
        let mut order = Vec::with_capacity(tasks.len());
        while let Some(next) = tasks.iter().find(|t| {
            !done.contains(&t.task_id)
                && t
                    .dependencies
                    .iter()
                    .all(|d| done.contains(d) || !state.tasks.contains_key(d))
        }) {
            done.insert(next.task_id);
            order.push(next.task_id);
        }

        for task in &tasks {
            if !done.contains(&task.task_id) {
                order.push(task.task_id);
            }
        }
        order
    }

    /// Current owner of `resource`
    pub async fn owner_of(&self, resource: &str) -> Option<ResourceClaim> {
        self.state.read().await.claims.get(resource).cloned()
    }

    /// Claims waiting on `resource`, in promotion order
    pub async fn contenders_of(&self, resource: &str) -> Vec<ResourceClaim> {
        self.state
            .read()
            .await
            .contenders
            .get(resource)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Installed time-slice schedule for `resource`
    pub async fn schedule_of(&self, resource: &str) -> Option<Vec<TimeSlot>> {
        self.state.read().await.schedules.get(resource).cloned()
    }

    /// Number of active tasks
    pub async fn active_tasks(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    /// State merged into an agent's tracked info
    pub async fn agent_info(&self, agent_id: &str) -> Option<Map<String, Value>> {
        self.state.read().await.agent_info.get(agent_id).cloned()
    }

    fn deliver(&self, adjustments: &[AgentAdjustment]) {
        for adjustment in adjustments {
            let delivered = self.adjustment_observers.notify(adjustment);
            debug!(
                agent_id = %adjustment.agent_id,
                conflict_id = %adjustment.conflict_id,
                delivered,
                "Adjustment delivered"
            );
        }
    }

    fn announce(&self, resolution: &ConflictResolution) {
        warn!(
            conflict_id = %resolution.conflict_id,
            kind = %resolution.kind,
            resolution = %resolution.resolution,
            agents = ?resolution.agents,
            resource = resolution.resource.as_deref().unwrap_or(""),
            "Conflict detected"
        );
        self.events.publish(CoordinationEvent::ConflictDetected {
            conflict_id: resolution.conflict_id,
            kind: resolution.kind,
            agents: resolution.agents.clone(),
        });
    }

    pub(crate) fn log_plan(&self, plan: &CoordinationPlan) {
        info!(
            plan_id = %plan.plan_id,
            strategy = ?plan.strategy,
            subtasks = plan.subtasks.len(),
            edges = plan.edges.len(),
            "Shared goal split"
        );
    }
}
