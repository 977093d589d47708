//! Intervention arbitration

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChildStatus, Orchestrator, PendingGuard, PendingIntervention, ProgressEvent};
use crate::agent::TaskReporter;
use crate::coordinator::Resolution;
use crate::event_bus::CoordinationEvent;
use crate::intervention::{InterventionResponse, UserIntervention};

impl Orchestrator {
    /// Get a decision for an intervention raised by `agent_id`.
    ///
    /// Sensitive requests (file/create/delete by default) that overlap another
    /// running child are settled by the coordinator's resolution: `defer`
    /// cancels, `merge` approves. Otherwise registered handlers are asked in
    /// order, and the wait can also be satisfied by
    /// [`Orchestrator::resolve_intervention`]. Returns `None` on timeout, and
    /// at once for an ID that is already pending; the first waiter keeps it.
    pub async fn handle_intervention(
        &self,
        agent_id: &str,
        intervention: UserIntervention,
    ) -> Option<InterventionResponse> {
        let intervention_id = intervention.id;
        self.events.publish(CoordinationEvent::InterventionRequested {
            intervention_id,
            agent_id: agent_id.to_string(),
        });

        if let Some(response) = self.arbitrate(agent_id, &intervention).await {
            info!(
                agent_id,
                intervention_id = %intervention_id,
                response = ?response,
                "Intervention settled by conflict resolution"
            );
            self.events.publish(CoordinationEvent::InterventionResolved {
                intervention_id,
                answered: true,
            });
            return Some(response);
        }

        let timeout = intervention.timeout().or(self
            .config
            .default_intervention_timeout_secs
            .map(Duration::from_secs));

        let (tx, rx) = oneshot::channel();
        let waiter = Uuid::new_v4();
        match self.pending_interventions.entry(intervention_id) {
            Entry::Occupied(existing) => {
                warn!(
                    agent_id,
                    intervention_id = %intervention_id,
                    pending_for = %existing.get().agent_id,
                    "Intervention already pending, duplicate rejected"
                );
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingIntervention {
                    waiter,
                    agent_id: agent_id.to_string(),
                    intervention: intervention.clone(),
                    resolver: tx,
                });
            }
        }
        let _pending = PendingGuard::new(&self.pending_interventions, intervention_id, waiter);

        let decision = async {
            self.consult_handlers(&intervention).await;
            rx.await.ok()
        };
        let response = match timeout {
            Some(limit) => tokio::select! {
                response = decision => response,
                _ = tokio::time::sleep(limit) => None,
            },
            None => decision.await,
        };

        match &response {
            Some(response) => {
                info!(agent_id, intervention_id = %intervention_id, response = ?response, "Intervention resolved")
            }
            None => warn!(agent_id, intervention_id = %intervention_id, "Intervention timed out"),
        }
        self.events.publish(CoordinationEvent::InterventionResolved {
            intervention_id,
            answered: response.is_some(),
        });
        response
    }

    /// Answer a pending intervention from outside (e.g. a UI).
    ///
    /// Returns false if the intervention is unknown, already answered or timed out.
    pub fn resolve_intervention(&self, intervention_id: Uuid, response: InterventionResponse) -> bool {
        match self.pending_interventions.remove(&intervention_id) {
            Some((_, pending)) => {
                debug!(
                    agent_id = %pending.agent_id,
                    intervention_id = %intervention_id,
                    "Resolving intervention"
                );
                pending.resolver.send(response).is_ok()
            }
            None => false,
        }
    }

    async fn consult_handlers(&self, intervention: &UserIntervention) {
        for (index, handler) in self.handler_snapshot().into_iter().enumerate() {
            match handler.handle(intervention).await {
                Ok(Some(response)) => {
                    self.resolve_intervention(intervention.id, response);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(intervention_id = %intervention.id, index, error = %e, "Intervention handler failed");
                }
            }
        }
    }

    async fn arbitrate(
        &self,
        agent_id: &str,
        intervention: &UserIntervention,
    ) -> Option<InterventionResponse> {
        let sensitive = self.sensitive.as_ref()?;
        if !sensitive.is_match(&intervention.message) {
            return None;
        }

        let others: Vec<String> = self
            .children
            .iter()
            .filter(|c| c.key() != agent_id && c.status == ChildStatus::Running)
            .map(|c| c.key().clone())
            .collect();

        for other in others {
            let Some(conflict) = self.coordinator.conflicts_between(agent_id, &other).await else {
                continue;
            };
            debug!(
                agent_id,
                other = %other,
                resolution = %conflict.resolution,
                "Sensitive intervention overlaps another child"
            );
            match conflict.resolution {
                Resolution::Defer => return Some(InterventionResponse::Cancelled),
                Resolution::Merge => return Some(InterventionResponse::Approved),
                _ => {}
            }
        }
        None
    }
}

#[async_trait]
impl TaskReporter for Orchestrator {
    async fn report_progress(&self, agent_id: &str, task_id: Uuid, progress: f32, message: &str) {
        self.progress_observers.notify(&ProgressEvent {
            agent_id: agent_id.to_string(),
            task_id,
            progress,
            message: message.to_string(),
        });
    }

    async fn request_intervention(
        &self,
        agent_id: &str,
        intervention: UserIntervention,
    ) -> Option<InterventionResponse> {
        self.handle_intervention(agent_id, intervention).await
    }
}
