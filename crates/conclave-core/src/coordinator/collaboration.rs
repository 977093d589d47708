//! Agent-to-agent collaboration requests

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{CollaborationKind, CollaborationOutcome, ResourceClaim};
use super::{Coordinator, CoordinatorState};
use crate::task::{AgentTask, Capability};

/// Payload of a `delegate_task` request
#[derive(Debug, Deserialize)]
struct DelegationPayload {
    #[serde(default = "default_task_type")]
    task_type: String,
    description: String,
    #[serde(default)]
    capabilities: Vec<Capability>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    context: HashMap<String, Value>,
}

fn default_task_type() -> String {
    "delegated".to_string()
}

/// Resource keys named by `resource` and `resources` in a payload
fn referenced_resources(payload: &Value) -> Vec<String> {
    let mut resources: Vec<String> = Vec::new();
    if let Some(resource) = payload.get("resource").and_then(Value::as_str) {
        resources.push(resource.to_string());
    }
    if let Some(list) = payload.get("resources").and_then(Value::as_array) {
        for resource in list.iter().filter_map(Value::as_str) {
            if !resources.iter().any(|r| r == resource) {
                resources.push(resource.to_string());
            }
        }
    }
    resources
}

/// First referenced resource held by someone other than `requester`
fn unavailable<'a>(
    state: &'a CoordinatorState,
    requester: &str,
    resources: &[String],
) -> Option<&'a ResourceClaim> {
    resources
        .iter()
        .filter_map(|r| state.claims.get(r))
        .find(|claim| claim.agent_id != requester)
}

impl Coordinator {
    /// Ask `to` for help on behalf of `from`.
    ///
    /// Denied when a deny rule matches or a referenced resource is claimed by
    /// another agent. Accepted requests are applied immediately:
    /// - `DelegateTask` builds a task pinned to `to` (returned in the outcome
    ///   for the caller to submit);
    /// - `LockResource` claims the referenced resources for `from`;
    /// - `MergeState` merges the payload object into `to`'s tracked info.
    pub async fn request_collaboration(
        &self,
        from: &str,
        to: &str,
        kind: CollaborationKind,
        payload: Value,
        priority: u8,
    ) -> CollaborationOutcome {
        let request_id = Uuid::new_v4();

        if let Some(rule) = self
            .config
            .deny_rules
            .iter()
            .find(|rule| rule.matches(from, to, kind))
        {
            info!(%request_id, from, to, ?kind, ?rule, "Collaboration denied by rule");
            return CollaborationOutcome::denied(request_id, "denied by rule");
        }

        let resources = referenced_resources(&payload);
        let mut state = self.state.write().await;

        if let Some(claim) = unavailable(&state, from, &resources) {
            let reason = format!("resource '{}' is held by {}", claim.resource, claim.agent_id);
            info!(%request_id, from, to, ?kind, %reason, "Collaboration denied");
            return CollaborationOutcome::denied(request_id, reason);
        }

        let outcome = match kind {
            CollaborationKind::DelegateTask => delegate(request_id, from, to, payload, priority),
            CollaborationKind::LockResource => lock(&mut state, request_id, from, &resources),
            CollaborationKind::MergeState => merge_state(&mut state, request_id, to, payload),
        };

        debug!(%request_id, from, to, ?kind, accepted = outcome.accepted, "Collaboration handled");
        outcome
    }
}

fn delegate(
    request_id: Uuid,
    from: &str,
    to: &str,
    payload: Value,
    priority: u8,
) -> CollaborationOutcome {
    let delegation: DelegationPayload = match serde_json::from_value(payload) {
        Ok(d) => d,
        Err(e) => {
            return CollaborationOutcome::denied(request_id, format!("invalid delegation: {e}"))
        }
    };

    let mut task = AgentTask::new(delegation.task_type, delegation.description)
        .with_capabilities(delegation.capabilities)
        .with_priority(priority)
        .with_context("delegated_by", Value::String(from.to_string()))
        .with_context("collaboration_request", Value::String(request_id.to_string()))
        .pinned_to(to);
    for resource in delegation.resources {
        task = task.with_resource(resource);
    }
    task.context.extend(delegation.context);

    CollaborationOutcome {
        delegated_task: Some(task),
        ..CollaborationOutcome::accepted(request_id)
    }
}

fn lock(
    state: &mut CoordinatorState,
    request_id: Uuid,
    from: &str,
    resources: &[String],
) -> CollaborationOutcome {
    if resources.is_empty() {
        return CollaborationOutcome::denied(request_id, "no resource named");
    }

    for resource in resources {
        if state.claims.contains_key(resource) {
            // Already held by the requester
            continue;
        }
        let claim = ResourceClaim {
            resource: resource.clone(),
            agent_id: from.to_string(),
            task_id: request_id,
            sequence: state.next_sequence(),
            claimed_at: Utc::now(),
        };
        state.claims.insert(resource.clone(), claim);
    }

    CollaborationOutcome::accepted(request_id)
}

fn merge_state(
    state: &mut CoordinatorState,
    request_id: Uuid,
    to: &str,
    payload: Value,
) -> CollaborationOutcome {
    let Value::Object(fields) = payload else {
        return CollaborationOutcome::denied(request_id, "merge payload must be an object");
    };

    let info: &mut Map<String, Value> = state.agent_info.entry(to.to_string()).or_default();
    info.extend(fields);
    CollaborationOutcome::accepted(request_id)
}
