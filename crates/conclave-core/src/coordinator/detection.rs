//! Conflict detection over tracked tasks and claims

use chrono::Utc;
use uuid::Uuid;

use super::types::{ConflictKind, CoordinatorConfig, ResourceClaim};
use super::{CoordinatorState, TrackedTask};

/// A conflict found before a resolution is chosen
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Detected {
    /// Several agents claim one resource (file or generic)
    Contention {
        resource: String,
        kind: ConflictKind,
    },
    /// `dependent` waits on another agent's `prerequisite`
    Dependency { dependent: Uuid, prerequisite: Uuid },
    /// Same slice of the same goal on two agents
    Logical { first: Uuid, second: Uuid },
    /// Two agents' tasks wait on the same dependency
    Timing {
        first: Uuid,
        second: Uuid,
        shared: Uuid,
    },
}

impl Detected {
    pub(crate) fn kind(&self) -> ConflictKind {
        match self {
            Self::Contention { kind, .. } => *kind,
            Self::Dependency { .. } => ConflictKind::Dependency,
            Self::Logical { .. } => ConflictKind::Logical,
            Self::Timing { .. } => ConflictKind::Timing,
        }
    }
}

fn contention(config: &CoordinatorConfig, resource: &str) -> Detected {
    let kind = if config.is_source_file(resource) {
        ConflictKind::File
    } else {
        ConflictKind::Resource
    };
    Detected::Contention {
        resource: resource.to_string(),
        kind,
    }
}

/// Claim `task`'s resources and report everything it collides with.
///
/// Must run under the coordinator's write guard: the ownership check and the
/// claim are one step.
pub(crate) fn claim_and_detect(
    state: &mut CoordinatorState,
    config: &CoordinatorConfig,
    task: &TrackedTask,
) -> Vec<Detected> {
    let mut found = Vec::new();

    for resource in &task.resources {
        let claim = ResourceClaim {
            resource: resource.clone(),
            agent_id: task.agent_id.clone(),
            task_id: task.task_id,
            sequence: task.sequence,
            claimed_at: Utc::now(),
        };

        match state.claims.get(resource) {
            None => {
                state.claims.insert(resource.clone(), claim);
            }
            Some(owner) => {
                let foreign = owner.agent_id != task.agent_id;
                // Contested claims wait behind the owner, same-agent ones included
                state
                    .contenders
                    .entry(resource.clone())
                    .or_default()
                    .push_back(claim);
                if foreign {
                    found.push(contention(config, resource));
                }
            }
        }
    }

    found.extend(relational(state, task));
    found
}

/// Dependency, logical and timing conflicts between `task` and other agents' tasks
fn relational(state: &CoordinatorState, task: &TrackedTask) -> Vec<Detected> {
    let mut found = Vec::new();

    for dependency in &task.dependencies {
        if let Some(prerequisite) = state.tasks.get(dependency) {
            if prerequisite.agent_id != task.agent_id {
                found.push(Detected::Dependency {
                    dependent: task.task_id,
                    prerequisite: *dependency,
                });
            }
        }
    }

    let mut others: Vec<&TrackedTask> = state
        .tasks
        .values()
        .filter(|t| t.agent_id != task.agent_id && t.task_id != task.task_id)
        .collect();
    others.sort_by_key(|t| t.sequence);

    for other in others {
        if duplicates(other, task) {
            found.push(Detected::Logical {
                first: other.task_id,
                second: task.task_id,
            });
        }
        if let Some(shared) = shared_dependency(other, task) {
            found.push(Detected::Timing {
                first: other.task_id,
                second: task.task_id,
                shared,
            });
        }
    }

    found
}

fn duplicates(a: &TrackedTask, b: &TrackedTask) -> bool {
    a.parent_id.is_some() && a.parent_id == b.parent_id && a.task_type == b.task_type
}

fn shared_dependency(a: &TrackedTask, b: &TrackedTask) -> Option<Uuid> {
    a.dependencies
        .iter()
        .find(|d| b.dependencies.contains(d))
        .copied()
}

/// First conflict between two agents' current claims and tasks.
pub(crate) fn detect_between(
    state: &CoordinatorState,
    config: &CoordinatorConfig,
    a: &str,
    b: &str,
) -> Option<Detected> {
    if a == b {
        return None;
    }

    let mut resources: Vec<&String> = state.claims.keys().collect();
    resources.sort();
    for resource in resources {
        let holders = state.holders(resource);
        if holders.iter().any(|h| h == a) && holders.iter().any(|h| h == b) {
            return Some(contention(config, resource));
        }
    }

    let tasks_b = tasks_of(state, b);
    for ta in tasks_of(state, a) {
        for tb in &tasks_b {
            let (earlier, later) = if ta.sequence <= tb.sequence {
                (ta, *tb)
            } else {
                (*tb, ta)
            };
            if later.dependencies.contains(&earlier.task_id) {
                return Some(Detected::Dependency {
                    dependent: later.task_id,
                    prerequisite: earlier.task_id,
                });
            }
            if earlier.dependencies.contains(&later.task_id) {
                return Some(Detected::Dependency {
                    dependent: earlier.task_id,
                    prerequisite: later.task_id,
                });
            }
            if duplicates(earlier, later) {
                return Some(Detected::Logical {
                    first: earlier.task_id,
                    second: later.task_id,
                });
            }
            if let Some(shared) = shared_dependency(earlier, later) {
                return Some(Detected::Timing {
                    first: earlier.task_id,
                    second: later.task_id,
                    shared,
                });
            }
        }
    }

    None
}

fn tasks_of<'a>(state: &'a CoordinatorState, agent_id: &str) -> Vec<&'a TrackedTask> {
    let mut tasks: Vec<&TrackedTask> = state
        .tasks
        .values()
        .filter(|t| t.agent_id == agent_id)
        .collect();
    tasks.sort_by_key(|t| t.sequence);
    tasks
}
