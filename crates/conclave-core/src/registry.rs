//! Agent Registry & Capability Router
//!
//! Tracks registered agents, indexes them by advertised capability and picks
//! the least-loaded eligible agent for a task.
//!
//! ## Routing rule
//!
//! ```text
//! candidates = ⋂ { agents advertising c | c ∈ task.capabilities_required }
//! pick       = preferred agent if it is a candidate,
//!              else min(load) over candidates, ties → earliest registration
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::{AgentConfig, CodingAgent};
use crate::error::{Error, Result, RoutingError};
use crate::task::{AgentTask, Capability};

struct RegisteredAgent {
    agent: Arc<dyn CodingAgent>,
    config: AgentConfig,
    capabilities: BTreeSet<Capability>,
}

#[derive(Default)]
struct RegistryState {
    /// Registration order
    agents: Vec<RegisteredAgent>,
    /// capability → agent IDs, registration order
    capability_index: HashMap<Capability, Vec<String>>,
    /// agent ID → in-flight tasks (queued in its lane or running)
    load: HashMap<String, usize>,
}

impl RegistryState {
    fn position(&self, agent_id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.agent.id() == agent_id)
    }

    /// Eligible agent IDs in registration order.
    fn candidates(&self, task: &AgentTask) -> Vec<&RegisteredAgent> {
        let mut eligible: Option<BTreeSet<&str>> = None;
        for capability in &task.capabilities_required {
            let ids: BTreeSet<&str> = self
                .capability_index
                .get(capability)
                .map(|ids| ids.iter().map(String::as_str).collect())
                .unwrap_or_default();
            eligible = Some(match eligible {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
        }

        self.agents
            .iter()
            .filter(|a| match &eligible {
                Some(ids) => ids.contains(a.agent.id()),
                // No requirements: every agent is eligible
                None => true,
            })
            .collect()
    }

    fn select(&self, task: &AgentTask) -> std::result::Result<Arc<dyn CodingAgent>, RoutingError> {
        let candidates = self.candidates(task);
        if candidates.is_empty() {
            return Err(RoutingError::NoEligibleAgent {
                required: task.capabilities_required.iter().copied().collect(),
            });
        }

        if let Some(preferred) = task.preferred_agent.as_deref() {
            if let Some(found) = candidates.iter().find(|a| a.agent.id() == preferred) {
                return Ok(found.agent.clone());
            }
            debug!(task_id = %task.id, preferred, "Preferred agent not eligible, routing by load");
        }

        let mut best: Option<(&RegisteredAgent, usize)> = None;
        for candidate in candidates {
            let load = self.load.get(candidate.agent.id()).copied().unwrap_or(0);
            // Strict `<` keeps the earliest-registered agent on ties
            if best.map_or(true, |(_, best_load)| load < best_load) {
                best = Some((candidate, load));
            }
        }

        best.map(|(a, _)| a.agent.clone())
            .ok_or_else(|| RoutingError::NoEligibleAgent {
                required: task.capabilities_required.iter().copied().collect(),
            })
    }
}

/// Registry of initialized agents
#[derive(Default)]
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and register an agent.
    ///
    /// If `initialize` fails the agent is not indexed and an
    /// [`Error::Initialization`] is returned; the rest of the system is unaffected.
    pub async fn register(&self, agent: Arc<dyn CodingAgent>, config: AgentConfig) -> Result<()> {
        let agent_id = agent.id().to_string();
        if self.state.read().await.position(&agent_id).is_some() {
            return Err(Error::Configuration(format!(
                "agent '{agent_id}' is already registered"
            )));
        }

        if let Err(e) = agent.initialize(&config).await {
            warn!(agent_id = %agent_id, error = %e, "Agent failed to initialize, not routable");
            return Err(Error::Initialization {
                agent_id,
                reason: e.to_string(),
            });
        }

        let capabilities: BTreeSet<Capability> = agent.capabilities().iter().copied().collect();
        let mut state = self.state.write().await;
        // A concurrent register of the same ID may have won while we initialized
        if state.position(&agent_id).is_some() {
            return Err(Error::Configuration(format!(
                "agent '{agent_id}' is already registered"
            )));
        }
        for capability in &capabilities {
            state
                .capability_index
                .entry(*capability)
                .or_default()
                .push(agent_id.clone());
        }
        state.load.insert(agent_id.clone(), 0);
        state.agents.push(RegisteredAgent {
            agent,
            config,
            capabilities,
        });

        info!(agent_id = %agent_id, "Agent registered");
        Ok(())
    }

    /// Remove an agent and shut it down. Returns false if unknown.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let Some(index) = state.position(agent_id) else {
                return false;
            };
            let removed = state.agents.remove(index);
            for ids in state.capability_index.values_mut() {
                ids.retain(|id| id != agent_id);
            }
            state.capability_index.retain(|_, ids| !ids.is_empty());
            state.load.remove(agent_id);
            removed
        };

        removed.agent.shutdown().await;
        info!(agent_id, "Agent unregistered");
        true
    }

    /// Look up an agent
    pub async fn get(&self, agent_id: &str) -> Option<Arc<dyn CodingAgent>> {
        let state = self.state.read().await;
        state
            .position(agent_id)
            .map(|i| state.agents[i].agent.clone())
    }

    /// Configuration an agent was registered with
    pub async fn agent_config(&self, agent_id: &str) -> Option<AgentConfig> {
        let state = self.state.read().await;
        state
            .position(agent_id)
            .map(|i| state.agents[i].config.clone())
    }

    /// Capabilities an agent advertised at registration
    pub async fn capabilities_of(&self, agent_id: &str) -> Option<BTreeSet<Capability>> {
        let state = self.state.read().await;
        state
            .position(agent_id)
            .map(|i| state.agents[i].capabilities.clone())
    }

    /// Registered agent IDs in registration order
    pub async fn agent_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .agents
            .iter()
            .map(|a| a.agent.id().to_string())
            .collect()
    }

    /// Agents advertising `capability`, in registration order
    pub async fn agents_with_capability(&self, capability: Capability) -> Vec<String> {
        let state = self.state.read().await;
        state
            .capability_index
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of registered agents
    pub async fn len(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// Whether no agents are registered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pick the agent for `task` without reserving it.
    pub async fn select_agent(
        &self,
        task: &AgentTask,
    ) -> std::result::Result<Arc<dyn CodingAgent>, RoutingError> {
        self.state.read().await.select(task)
    }

    /// Pick the agent for `task` (or check the pinned one) and count the task
    /// against its load in the same critical section.
    pub async fn reserve(
        &self,
        task: &AgentTask,
        pinned: Option<&str>,
    ) -> std::result::Result<Arc<dyn CodingAgent>, RoutingError> {
        let mut state = self.state.write().await;
        let agent = match pinned {
            Some(agent_id) => {
                let index = state
                    .position(agent_id)
                    .ok_or_else(|| RoutingError::AgentNotFound(agent_id.to_string()))?;
                let registered = &state.agents[index];
                if !task.is_satisfied_by(&registered.capabilities) {
                    return Err(RoutingError::NoEligibleAgent {
                        required: task.capabilities_required.iter().copied().collect(),
                    });
                }
                registered.agent.clone()
            }
            None => state.select(task)?,
        };

        *state.load.entry(agent.id().to_string()).or_insert(0) += 1;
        debug!(task_id = %task.id, agent_id = agent.id(), "Task routed");
        Ok(agent)
    }

    /// Undo one reservation
    pub async fn release(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        if let Some(load) = state.load.get_mut(agent_id) {
            *load = load.saturating_sub(1);
        }
    }

    /// In-flight task count for an agent
    pub async fn load_of(&self, agent_id: &str) -> usize {
        self.state
            .read()
            .await
            .load
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }

    /// Shut down every registered agent and clear the registry
    pub async fn shutdown_all(&self) {
        let agents: Vec<Arc<dyn CodingAgent>> = {
            let mut state = self.state.write().await;
            let agents = state.agents.drain(..).map(|a| a.agent).collect();
            state.capability_index.clear();
            state.load.clear();
            agents
        };
        for agent in agents {
            agent.shutdown().await;
        }
    }
}
