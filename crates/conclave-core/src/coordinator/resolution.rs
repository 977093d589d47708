//! Fixed resolution policy, one rule per conflict kind

use chrono::Utc;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::detection::Detected;
use super::types::{ConflictKind, ConflictResolution, CoordinatorConfig, TimeSlot};
use super::{CoordinatorState, TrackedTask};

/// Build the resolution for `detected` and install any schedule it implies.
///
/// Returns `None` when the tasks involved are no longer tracked.
pub(crate) fn resolve(
    state: &mut CoordinatorState,
    config: &CoordinatorConfig,
    detected: Detected,
) -> Option<ConflictResolution> {
    let kind = detected.kind();
    let (agents, resource, adjustments) = match detected {
        Detected::Contention { resource, kind } => {
            let (agents, adjustments) = match kind {
                ConflictKind::File => sections(state, &resource),
                _ => time_slices(state, config, &resource),
            };
            (agents, Some(resource), adjustments)
        }
        Detected::Dependency {
            dependent,
            prerequisite,
        } => {
            let (agents, adjustments) = reorder(state, dependent, prerequisite)?;
            (agents, None, adjustments)
        }
        Detected::Logical { first, second } => {
            let (agents, adjustments) = merge(state, first, second)?;
            (agents, None, adjustments)
        }
        Detected::Timing {
            first,
            second,
            shared,
        } => {
            let (agents, adjustments) = defer(state, first, second, shared)?;
            (agents, None, adjustments)
        }
    };

    if agents.len() < 2 {
        return None;
    }

    Some(ConflictResolution {
        conflict_id: Uuid::new_v4(),
        kind,
        agents,
        resolution: kind.resolution(),
        resource,
        adjustments,
        detected_at: Utc::now(),
    })
}

type Adjustments = BTreeMap<String, Value>;

/// Agents holding or queued on `resource`, first claim per agent, in claim order
fn participants(state: &CoordinatorState, resource: &str) -> Vec<(String, u64)> {
    let mut seen: Vec<(String, u64)> = Vec::new();
    let owner = state.claims.get(resource).into_iter();
    let queued = state.contenders.get(resource).into_iter().flatten();
    for claim in owner.chain(queued) {
        if !seen.iter().any(|(agent, _)| *agent == claim.agent_id) {
            seen.push((claim.agent_id.clone(), claim.sequence));
        }
    }
    seen
}

/// File: disjoint sections, each agent waits for the next-higher-priority one.
///
/// Ranking: agent priority (highest first), then earliest claim, then agent ID.
fn sections(state: &CoordinatorState, resource: &str) -> (Vec<String>, Adjustments) {
    let mut ranked = participants(state, resource);
    ranked.sort_by(|(a, a_seq), (b, b_seq)| {
        Reverse(state.agent_priority(a))
            .cmp(&Reverse(state.agent_priority(b)))
            .then(a_seq.cmp(b_seq))
            .then(a.cmp(b))
    });

    let count = ranked.len();
    let mut adjustments = Adjustments::new();
    let mut previous: Option<&str> = None;
    for (section, (agent, _)) in ranked.iter().enumerate() {
        adjustments.insert(
            agent.clone(),
            json!({
                "resource": resource,
                "section": section,
                "section_count": count,
                "priority": state.agent_priority(agent),
                "wait_for": previous,
            }),
        );
        previous = Some(agent.as_str());
    }

    (ranked.into_iter().map(|(agent, _)| agent).collect(), adjustments)
}

/// Resource: one window per agent in claim order; the schedule is installed.
fn time_slices(
    state: &mut CoordinatorState,
    config: &CoordinatorConfig,
    resource: &str,
) -> (Vec<String>, Adjustments) {
    let ordered = participants(state, resource);
    let duration = config.time_slice_secs;

    let slots: Vec<TimeSlot> = ordered
        .iter()
        .enumerate()
        .map(|(slot, (agent, _))| TimeSlot {
            agent_id: agent.clone(),
            slot,
            start_offset_secs: slot as u64 * duration,
            duration_secs: duration,
        })
        .collect();

    let adjustments = slots
        .iter()
        .map(|s| {
            (
                s.agent_id.clone(),
                json!({
                    "resource": resource,
                    "slot": s.slot,
                    "start_offset_secs": s.start_offset_secs,
                    "duration_secs": s.duration_secs,
                }),
            )
        })
        .collect();

    state.schedules.insert(resource.to_string(), slots);
    (ordered.into_iter().map(|(agent, _)| agent).collect(), adjustments)
}

fn tracked_pair(state: &CoordinatorState, a: Uuid, b: Uuid) -> Option<(TrackedTask, TrackedTask)> {
    Some((state.tasks.get(&a)?.clone(), state.tasks.get(&b)?.clone()))
}

/// Higher priority first; earlier registration wins ties
fn by_precedence(a: TrackedTask, b: TrackedTask) -> (TrackedTask, TrackedTask) {
    if (Reverse(a.priority), a.sequence) <= (Reverse(b.priority), b.sequence) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Dependency: prerequisite first, dependent waits for it.
fn reorder(
    state: &CoordinatorState,
    dependent: Uuid,
    prerequisite: Uuid,
) -> Option<(Vec<String>, Adjustments)> {
    let (dependent, prerequisite) = tracked_pair(state, dependent, prerequisite)?;
    let order = [prerequisite.task_id, dependent.task_id];

    let mut adjustments = Adjustments::new();
    adjustments.insert(
        prerequisite.agent_id.clone(),
        json!({
            "task_id": prerequisite.task_id,
            "execution_order": order,
            "unblocks": dependent.task_id,
        }),
    );
    adjustments.insert(
        dependent.agent_id.clone(),
        json!({
            "task_id": dependent.task_id,
            "execution_order": order,
            "wait_for_task": prerequisite.task_id,
            "wait_for": prerequisite.agent_id,
        }),
    );

    Some((vec![prerequisite.agent_id, dependent.agent_id], adjustments))
}

/// Logical: the task with precedence is primary, the other merges into it.
fn merge(state: &CoordinatorState, first: Uuid, second: Uuid) -> Option<(Vec<String>, Adjustments)> {
    let (a, b) = tracked_pair(state, first, second)?;
    let (primary, secondary) = by_precedence(a, b);
    let merge_point = primary.parent_id;

    let mut adjustments = Adjustments::new();
    adjustments.insert(
        primary.agent_id.clone(),
        json!({
            "task_id": primary.task_id,
            "role": "primary",
            "partner": secondary.agent_id,
            "merge_point": merge_point,
        }),
    );
    adjustments.insert(
        secondary.agent_id.clone(),
        json!({
            "task_id": secondary.task_id,
            "role": "secondary",
            "partner": primary.agent_id,
            "merge_point": merge_point,
        }),
    );

    Some((vec![primary.agent_id, secondary.agent_id], adjustments))
}

/// Timing: the lower-priority task is rescheduled after the other.
fn defer(
    state: &CoordinatorState,
    first: Uuid,
    second: Uuid,
    shared: Uuid,
) -> Option<(Vec<String>, Adjustments)> {
    let (a, b) = tracked_pair(state, first, second)?;
    let (proceed, deferred) = by_precedence(a, b);

    let mut adjustments = Adjustments::new();
    adjustments.insert(
        proceed.agent_id.clone(),
        json!({
            "task_id": proceed.task_id,
            "action": "proceed",
        }),
    );
    adjustments.insert(
        deferred.agent_id.clone(),
        json!({
            "task_id": deferred.task_id,
            "action": "reschedule",
            "after_task": proceed.task_id,
            "shared_dependency": shared,
        }),
    );

    Some((vec![proceed.agent_id, deferred.agent_id], adjustments))
}
