//! Shared-goal planning
//!
//! Splits a goal into a fixed template of phases, assigns each phase to the
//! best-scoring agent and wires dependency edges per [`CoordinationStrategy`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use super::Coordinator;
use crate::error::{Result, RoutingError};
use crate::task::{AgentTask, Capability};

/// An agent as offered to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Agent ID
    pub agent_id: String,
    /// Advertised capabilities
    pub capabilities: BTreeSet<Capability>,
}

impl AgentProfile {
    /// Create a profile
    pub fn new(agent_id: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

/// How subtasks of a shared goal are scheduled relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    /// Each subtask waits for the previous one
    Sequential,
    /// No ordering
    Parallel,
    /// Subtasks touching the same resources are ordered
    Collaborative,
    /// Agents race; no ordering
    Competitive,
}

/// One phase of a plan, assigned to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSubtask {
    /// Template phase (e.g., "design")
    pub phase: String,
    /// Assigned agent
    pub agent_id: String,
    /// Capability-match score of the assignment
    pub score: u32,
    /// Task to submit, pinned to `agent_id`
    pub task: AgentTask,
}

/// Ordered subtasks for a shared goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationPlan {
    /// Plan ID; parent of every subtask
    pub plan_id: Uuid,
    /// The shared goal
    pub goal: String,
    /// Strategy used to wire edges
    pub strategy: CoordinationStrategy,
    /// Subtasks in template order
    pub subtasks: Vec<PlannedSubtask>,
    /// Dependency edges `(before, after)` as subtask indices
    pub edges: Vec<(usize, usize)>,
}

impl CoordinationPlan {
    /// Subtask tasks in template order
    pub fn tasks(&self) -> impl Iterator<Item = &AgentTask> {
        self.subtasks.iter().map(|s| &s.task)
    }

    /// `(phase, agent)` pairs in template order
    #[must_use]
    pub fn assignments(&self) -> Vec<(&str, &str)> {
        self.subtasks
            .iter()
            .map(|s| (s.phase.as_str(), s.agent_id.as_str()))
            .collect()
    }
}

struct Phase {
    name: &'static str,
    /// First entry is the phase's primary capability
    capabilities: &'static [Capability],
    resources: &'static [&'static str],
}

const BUILD_KEYWORDS: &[&str] = &["implement", "build", "create", "develop", "feature"];

const BUILD_TEMPLATE: &[Phase] = &[
    Phase {
        name: "design",
        capabilities: &[Capability::Architecture, Capability::Planning],
        resources: &["docs/design.md"],
    },
    Phase {
        name: "implement",
        capabilities: &[Capability::CodeGeneration, Capability::Refactoring],
        resources: &["src/"],
    },
    Phase {
        name: "test",
        capabilities: &[Capability::Testing, Capability::Debugging],
        resources: &["src/", "tests/"],
    },
    Phase {
        name: "document",
        capabilities: &[Capability::Documentation],
        resources: &["docs/design.md", "README.md"],
    },
];

const GENERAL_TEMPLATE: &[Phase] = &[
    Phase {
        name: "analyze",
        capabilities: &[Capability::Research, Capability::CodeReview],
        resources: &["analysis"],
    },
    Phase {
        name: "plan",
        capabilities: &[Capability::Planning, Capability::Architecture],
        resources: &["analysis", "plan"],
    },
    Phase {
        name: "execute",
        capabilities: &[Capability::CodeGeneration, Capability::Refactoring],
        resources: &["plan", "workspace"],
    },
    Phase {
        name: "verify",
        capabilities: &[Capability::Testing, Capability::CodeReview],
        resources: &["workspace"],
    },
];

const MATCH_POINTS: u32 = 10;
const PRIMARY_BONUS: u32 = 5;

fn template_for(goal: &str) -> &'static [Phase] {
    let lowered = goal.to_lowercase();
    let is_build = lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| BUILD_KEYWORDS.iter().any(|k| word.starts_with(k)));
    if is_build {
        BUILD_TEMPLATE
    } else {
        GENERAL_TEMPLATE
    }
}

fn score(profile: &AgentProfile, phase: &Phase) -> u32 {
    let matched = phase
        .capabilities
        .iter()
        .filter(|c| profile.capabilities.contains(*c))
        .count() as u32;
    let primary = phase
        .capabilities
        .first()
        .is_some_and(|c| profile.capabilities.contains(c));
    matched * MATCH_POINTS + if primary { PRIMARY_BONUS } else { 0 }
}

fn edges_for(strategy: CoordinationStrategy, phases: &[Phase]) -> Vec<(usize, usize)> {
    match strategy {
        CoordinationStrategy::Sequential => (1..phases.len()).map(|i| (i - 1, i)).collect(),
        CoordinationStrategy::Collaborative => {
            let mut edges = Vec::new();
            for (i, earlier) in phases.iter().enumerate() {
                for (j, later) in phases.iter().enumerate().skip(i + 1) {
                    if earlier.resources.iter().any(|r| later.resources.contains(r)) {
                        edges.push((i, j));
                    }
                }
            }
            edges
        }
        CoordinationStrategy::Parallel | CoordinationStrategy::Competitive => Vec::new(),
    }
}

impl Coordinator {
    /// Split `goal` into subtasks assigned across `agents`.
    ///
    /// Each phase goes to the highest-scoring agent (first listed on ties);
    /// an agent may receive several phases.
    pub fn coordinate_parallel_work(
        &self,
        agents: &[AgentProfile],
        goal: &str,
        strategy: CoordinationStrategy,
    ) -> Result<CoordinationPlan> {
        if agents.is_empty() {
            return Err(RoutingError::NoEligibleAgent {
                required: Vec::new(),
            }
            .into());
        }

        let plan_id = Uuid::new_v4();
        let phases = template_for(goal);

        let mut subtasks: Vec<PlannedSubtask> = Vec::with_capacity(phases.len());
        for phase in phases {
            let mut best = &agents[0];
            let mut best_score = score(best, phase);
            for profile in &agents[1..] {
                let s = score(profile, phase);
                if s > best_score {
                    best = profile;
                    best_score = s;
                }
            }

            // Only require what the assignee can do, so the pinned task stays routable
            let required = phase
                .capabilities
                .iter()
                .copied()
                .filter(|c| best.capabilities.contains(c));

            let mut task = AgentTask::new(phase.name, format!("{}: {}", phase.name, goal))
                .with_capabilities(required)
                .with_parent(plan_id)
                .with_context("goal", Value::String(goal.to_string()))
                .with_context("phase", Value::String(phase.name.to_string()))
                .pinned_to(best.agent_id.clone());
            for resource in phase.resources {
                task = task.with_resource(*resource);
            }

            subtasks.push(PlannedSubtask {
                phase: phase.name.to_string(),
                agent_id: best.agent_id.clone(),
                score: best_score,
                task,
            });
        }

        let edges = edges_for(strategy, phases);
        for &(before, after) in &edges {
            let prerequisite = subtasks[before].task.id;
            subtasks[after].task = subtasks[after].task.clone().with_dependency(prerequisite);
        }

        let plan = CoordinationPlan {
            plan_id,
            goal: goal.to_string(),
            strategy,
            subtasks,
            edges,
        };
        self.log_plan(&plan);
        Ok(plan)
    }
}
