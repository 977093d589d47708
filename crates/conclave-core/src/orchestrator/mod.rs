//! Orchestrator - child-agent lifecycle and intervention arbitration
//!
//! Provisions child agents on the hosting collaborator over the transport,
//! tracks their handles, routes their progress/completion messages to ordered
//! observers, and arbitrates interventions: conflict pre-check through the
//! [`Coordinator`] first, then human-facing handlers, then an asynchronous
//! [`Orchestrator::resolve_intervention`].
//!
//! ```text
//! running ──► completed
//!    ├──────► failed
//!    └──────► cancelled      (terminal states are final)
//! ```

use conclave_protocol::{AgentMessage, SyncResponse, TaskCancel, TaskCreate};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::event_bus::{CoordinationEvent, EventBus};
use crate::intervention::{InterventionHandler, InterventionResponse, UserIntervention};
use crate::observers::ObserverRegistry;
use crate::task::AgentTask;
use crate::transport::Transport;

mod intervention;
mod messages;
pub mod types;

pub use messages::ADJUSTMENT_TOPIC;
pub use types::{ChildAgentHandle, ChildCompletion, ChildStatus, OrchestratorConfig, ProgressEvent};

/// Entry in a pending map, tagged with the waiter that inserted it
trait Pending {
    fn waiter(&self) -> Uuid;
}

struct PendingIntervention {
    waiter: Uuid,
    agent_id: String,
    intervention: UserIntervention,
    resolver: oneshot::Sender<InterventionResponse>,
}

impl Pending for PendingIntervention {
    fn waiter(&self) -> Uuid {
        self.waiter
    }
}

struct PendingAck {
    waiter: Uuid,
    reply: oneshot::Sender<AgentMessage>,
}

impl Pending for PendingAck {
    fn waiter(&self) -> Uuid {
        self.waiter
    }
}

/// Removes the waiter's own entry when it finishes, however it finishes.
/// An entry inserted later under the same key by someone else is left alone.
struct PendingGuard<'a, V: Pending> {
    map: &'a DashMap<Uuid, V>,
    id: Uuid,
    waiter: Uuid,
}

impl<'a, V: Pending> PendingGuard<'a, V> {
    fn new(map: &'a DashMap<Uuid, V>, id: Uuid, waiter: Uuid) -> Self {
        Self { map, id, waiter }
    }
}

impl<V: Pending> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        self.map.remove_if(&self.id, |_, entry| entry.waiter() == self.waiter);
    }
}

/// Child-agent lifecycle manager and intervention arbiter
pub struct Orchestrator {
    config: OrchestratorConfig,
    transport: Arc<dyn Transport>,
    coordinator: Arc<Coordinator>,
    events: EventBus,
    children: DashMap<String, ChildAgentHandle>,
    /// outbound message ID → acknowledgement waiter
    pending_acks: DashMap<Uuid, PendingAck>,
    pending_interventions: DashMap<Uuid, PendingIntervention>,
    handlers: RwLock<Vec<Arc<dyn InterventionHandler>>>,
    progress_observers: ObserverRegistry<ProgressEvent>,
    completion_observers: ObserverRegistry<ChildCompletion>,
    sensitive: Option<Regex>,
}

fn sensitive_pattern(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }

    Regex::new(&format!(r"(?i)\b(?:{})", alternatives.join("|")))
        .map(Some)
        .map_err(|e| Error::Configuration(format!("invalid sensitive keyword pattern: {e}")))
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<dyn Transport>,
        coordinator: Arc<Coordinator>,
        events: EventBus,
    ) -> Result<Self> {
        let sensitive = sensitive_pattern(&config.sensitive_keywords)?;
        Ok(Self {
            config,
            transport,
            coordinator,
            events,
            children: DashMap::new(),
            pending_acks: DashMap::new(),
            pending_interventions: DashMap::new(),
            handlers: RwLock::new(Vec::new()),
            progress_observers: ObserverRegistry::new("progress"),
            completion_observers: ObserverRegistry::new("completion"),
            sensitive,
        })
    }

    /// Orchestrator settings
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Add a human-facing intervention handler; handlers are asked in registration order
    pub fn register_intervention_handler(&self, handler: Arc<dyn InterventionHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    /// Observe progress from children and locally dispatched tasks
    pub fn on_progress<F>(&self, observer: F)
    where
        F: Fn(&ProgressEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.progress_observers.register(observer);
    }

    /// Observe child completions and failures
    pub fn on_completion<F>(&self, observer: F)
    where
        F: Fn(&ChildCompletion) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.completion_observers.register(observer);
    }

    /// Provision a child agent for `task` on the host.
    ///
    /// Sends `task-create` and waits for the host's `sync-response`
    /// acknowledgement, which carries the remote agent and pane IDs. The task's
    /// resource claims are registered under the child's ID.
    pub async fn create_child(
        &self,
        agent_type: &str,
        task: &AgentTask,
        pane_config: Option<Value>,
    ) -> Result<ChildAgentHandle> {
        let payload = TaskCreate {
            task_id: task.id,
            task_type: task.task_type.clone(),
            description: task.description.clone(),
            capabilities: task
                .capabilities_required
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            priority: task.priority,
            agent_type: Some(agent_type.to_string()),
            pane: pane_config,
            resources: task.resources.clone(),
            context: task
                .context
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let message = AgentMessage::from_payload(
            &self.config.agent_id,
            Some(self.config.host_agent.clone()),
            &payload,
        )?;

        let ack = self.request_ack(message).await?;
        let response: SyncResponse = ack.decode_payload()?;
        if !response.accepted {
            return Err(Error::Transport(format!(
                "host rejected task-create: {}",
                response.error.unwrap_or_else(|| "no reason given".to_string())
            )));
        }
        let agent_id = response
            .agent_id
            .ok_or_else(|| Error::Transport("task-create ack without agent_id".to_string()))?;

        let handle = ChildAgentHandle {
            agent_id: agent_id.clone(),
            agent_type: agent_type.to_string(),
            task_id: task.id,
            pane_id: response.pane_id,
            created_at: chrono::Utc::now(),
            status: ChildStatus::Running,
            progress: 0.0,
            last_heartbeat: None,
        };
        self.children.insert(agent_id.clone(), handle.clone());

        self.coordinator
            .register_task(&agent_id, task, &task.resources, &task.dependencies)
            .await;

        info!(agent_id = %agent_id, task_id = %task.id, pane_id = ?handle.pane_id, "Child agent created");
        self.events.publish(CoordinationEvent::ChildCreated {
            agent_id,
            task_id: task.id,
        });
        Ok(handle)
    }

    /// Ask the host to cancel a child's task.
    ///
    /// The handle is marked cancelled once the host acknowledges. Returns false
    /// for unknown or already-finished children and when no acknowledgement arrives.
    pub async fn cancel_child(&self, agent_id: &str) -> bool {
        let task_id = match self.children.get(agent_id) {
            Some(child) if !child.status.is_terminal() => child.task_id,
            Some(_) => return false,
            None => return false,
        };

        let payload = TaskCancel {
            task_id,
            reason: Some("cancelled by orchestrator".to_string()),
        };
        let message = match AgentMessage::from_payload(
            &self.config.agent_id,
            Some(self.config.host_agent.clone()),
            &payload,
        ) {
            Ok(message) => message,
            Err(e) => {
                warn!(agent_id, error = %e, "Could not build task-cancel");
                return false;
            }
        };

        let accepted = match self.request_ack(message).await {
            Ok(ack) => ack
                .decode_payload::<SyncResponse>()
                .map(|r| r.accepted)
                .unwrap_or(false),
            Err(e) => {
                warn!(agent_id, error = %e, "Child cancel not acknowledged");
                false
            }
        };
        if !accepted {
            return false;
        }

        let transitioned = self
            .children
            .get_mut(agent_id)
            .is_some_and(|mut child| child.transition(ChildStatus::Cancelled));
        if transitioned {
            self.coordinator.release_task(task_id).await;
            self.events.publish(CoordinationEvent::ChildStatusChanged {
                agent_id: agent_id.to_string(),
                status: ChildStatus::Cancelled,
            });
            info!(agent_id, task_id = %task_id, "Child agent cancelled");
        }
        transitioned
    }

    /// Send `message` and wait for the reply pointing back at it.
    async fn request_ack(&self, message: AgentMessage) -> Result<AgentMessage> {
        let message_id = message.message_id;
        let kind = message.kind;
        let (tx, rx) = oneshot::channel();
        let waiter = Uuid::new_v4();
        match self.pending_acks.entry(message_id) {
            Entry::Occupied(_) => {
                return Err(Error::Transport(format!(
                    "{kind} {message_id} is already awaiting an acknowledgement"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingAck { waiter, reply: tx });
            }
        }
        let _pending = PendingGuard::new(&self.pending_acks, message_id, waiter);

        if !self.transport.send(message).await {
            return Err(Error::Transport(format!(
                "failed to send {kind} to {}",
                self.config.host_agent
            )));
        }

        let timeout = Duration::from_millis(self.config.ack_timeout_ms);
        tokio::select! {
            ack = rx => ack.map_err(|_| Error::Transport(format!("{kind} acknowledgement dropped"))),
            _ = tokio::time::sleep(timeout) => Err(Error::Transport(format!(
                "no {kind} acknowledgement within {}ms",
                self.config.ack_timeout_ms
            ))),
        }
    }

    /// A tracked child
    #[must_use]
    pub fn child(&self, agent_id: &str) -> Option<ChildAgentHandle> {
        self.children.get(agent_id).map(|c| c.clone())
    }

    /// Children still running
    #[must_use]
    pub fn active_children(&self) -> Vec<ChildAgentHandle> {
        self.children
            .iter()
            .filter(|c| c.status == ChildStatus::Running)
            .map(|c| c.clone())
            .collect()
    }

    /// Every tracked child, any status
    #[must_use]
    pub fn children(&self) -> Vec<ChildAgentHandle> {
        self.children.iter().map(|c| c.clone()).collect()
    }

    /// Interventions waiting for a decision
    #[must_use]
    pub fn pending_interventions(&self) -> Vec<UserIntervention> {
        self.pending_interventions
            .iter()
            .map(|p| p.intervention.clone())
            .collect()
    }

    fn handler_snapshot(&self) -> Vec<Arc<dyn InterventionHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
