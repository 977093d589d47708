//! Inbound message routing

use conclave_protocol::{
    AgentHeartbeat, AgentMessage, AgentUnregister, BroadcastNotice, InterventionRequest,
    InterventionResponse as InterventionReply, MessageKind, ProgressUpdate, TaskComplete,
    TaskFailed,
};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{ChildCompletion, ChildStatus, Orchestrator, ProgressEvent};
use crate::coordinator::AgentAdjustment;
use crate::event_bus::CoordinationEvent;
use crate::intervention::{InterventionResponse, UserIntervention};
use crate::transport::MessageHandler;

/// Topic of the `broadcast` notice that carries a conflict adjustment to a child
pub const ADJUSTMENT_TOPIC: &str = "conflict-adjustment";

impl Orchestrator {
    /// Register [`Orchestrator::handle_message`] with the transport for every
    /// kind, and forward conflict adjustments for running children to them.
    ///
    /// Handlers hold a weak reference, so the transport does not keep the
    /// orchestrator alive.
    pub fn install_handlers(self: &Arc<Self>) {
        let orchestrator = Arc::downgrade(self);
        self.coordinator.on_adjustment(move |adjustment| {
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.forward_adjustment(adjustment)?;
            }
            Ok(())
        });

        for kind in MessageKind::ALL {
            let orchestrator = Arc::downgrade(self);
            let handler: MessageHandler = Arc::new(move |message| {
                let orchestrator = orchestrator.clone();
                async move {
                    if let Some(orchestrator) = orchestrator.upgrade() {
                        orchestrator.handle_message(message).await;
                    }
                }
                .boxed()
            });
            self.transport.register_handler(kind, handler);
        }
    }

    /// Single entry point for inbound messages.
    ///
    /// Malformed payloads are logged and dropped. Intervention requests are
    /// arbitrated on a spawned task and answered from there, so this returns
    /// without waiting for the decision.
    pub async fn handle_message(self: &Arc<Self>, message: AgentMessage) {
        if let Some(reply_to) = message.reply_to {
            if let Some((_, pending)) = self.pending_acks.remove(&reply_to) {
                debug!(kind = %message.kind, reply_to = %reply_to, "Acknowledgement received");
                let _ = pending.reply.send(message);
                return;
            }
        }

        let kind = message.kind;
        match kind {
            MessageKind::ProgressUpdate => self.on_progress_update(&message),
            MessageKind::TaskComplete => self.on_task_complete(&message).await,
            MessageKind::TaskFailed => self.on_task_failed(&message).await,
            MessageKind::InterventionRequest => {
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move { orchestrator.on_intervention_request(&message).await });
            }
            MessageKind::InterventionResponse => self.on_intervention_response(&message),
            MessageKind::AgentHeartbeat => self.on_heartbeat(&message),
            MessageKind::AgentUnregister => self.on_unregister(&message).await,
            kind => debug!(kind = %kind, from = %message.from_agent, "Message ignored"),
        }
    }

    /// Send `adjustment` to the running child it names. Adjustments for
    /// anyone else are left to the dispatcher.
    fn forward_adjustment(&self, adjustment: &AgentAdjustment) -> anyhow::Result<()> {
        let running = self
            .children
            .get(&adjustment.agent_id)
            .is_some_and(|c| c.status == ChildStatus::Running);
        if !running {
            return Ok(());
        }

        let notice = BroadcastNotice {
            topic: ADJUSTMENT_TOPIC.to_string(),
            data: serde_json::to_value(adjustment)?,
        };
        let message = AgentMessage::from_payload(
            &self.config.agent_id,
            Some(adjustment.agent_id.clone()),
            &notice,
        )?;
        let transport = self.transport.clone();
        let agent_id = adjustment.agent_id.clone();
        let conflict_id = adjustment.conflict_id;
        tokio::spawn(async move {
            if transport.send(message).await {
                debug!(agent_id = %agent_id, conflict_id = %conflict_id, "Conflict adjustment sent");
            } else {
                warn!(agent_id = %agent_id, conflict_id = %conflict_id, "Conflict adjustment not delivered");
            }
        });
        Ok(())
    }

    fn on_progress_update(&self, message: &AgentMessage) {
        let Ok(update) = decode::<ProgressUpdate>(message) else {
            return;
        };
        let progress = update.progress.clamp(0.0, 1.0);
        if let Some(mut child) = self.children.get_mut(&message.from_agent) {
            if child.status == ChildStatus::Running {
                child.progress = progress;
            }
        }

        self.progress_observers.notify(&ProgressEvent {
            agent_id: message.from_agent.clone(),
            task_id: update.task_id,
            progress,
            message: update.message,
        });
    }

    async fn on_task_complete(&self, message: &AgentMessage) {
        let Ok(complete) = decode::<TaskComplete>(message) else {
            return;
        };
        let status = if complete.success {
            ChildStatus::Completed
        } else {
            ChildStatus::Failed
        };
        let completion = ChildCompletion {
            agent_id: message.from_agent.clone(),
            task_id: complete.task_id,
            success: complete.success,
            output: complete.output,
            error: None,
            result: complete.result,
            execution_time_ms: complete.execution_time_ms,
        };
        self.finish_child(status, completion).await;
    }

    async fn on_task_failed(&self, message: &AgentMessage) {
        let Ok(failed) = decode::<TaskFailed>(message) else {
            return;
        };
        let completion = ChildCompletion {
            agent_id: message.from_agent.clone(),
            task_id: failed.task_id,
            success: false,
            output: String::new(),
            error: Some(failed.error),
            result: failed.result,
            execution_time_ms: 0,
        };
        self.finish_child(ChildStatus::Failed, completion).await;
    }

    /// Move the child to a terminal status and fan out the completion.
    ///
    /// Reports for a child that already finished are dropped.
    async fn finish_child(&self, status: ChildStatus, completion: ChildCompletion) {
        let agent_id = completion.agent_id.clone();
        let transitioned = match self.children.get_mut(&agent_id) {
            Some(mut child) => {
                if !child.transition(status) {
                    debug!(agent_id = %agent_id, status = ?child.status, "Report for finished child dropped");
                    return;
                }
                if status == ChildStatus::Completed {
                    child.progress = 1.0;
                }
                true
            }
            None => false,
        };

        if transitioned {
            self.coordinator.release_task(completion.task_id).await;
            self.events.publish(CoordinationEvent::ChildStatusChanged {
                agent_id: agent_id.clone(),
                status,
            });
            info!(agent_id = %agent_id, task_id = %completion.task_id, status = ?status, "Child agent finished");
        } else {
            debug!(agent_id = %agent_id, task_id = %completion.task_id, "Completion from untracked agent");
        }
        self.completion_observers.notify(&completion);
    }

    async fn on_intervention_request(&self, message: &AgentMessage) {
        let Ok(request) = decode::<InterventionRequest>(message) else {
            return;
        };
        let started = Instant::now();
        let intervention = UserIntervention::from_request(request);
        let intervention_id = intervention.id;

        let response = self
            .handle_intervention(&message.from_agent, intervention)
            .await;

        let reply = InterventionReply {
            intervention_id,
            response: response.and_then(|r| serde_json::to_value(r).ok()),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let Some(reply) = AgentMessage::reply(message, &self.config.agent_id, &reply)
            .map_err(|e| warn!(intervention_id = %intervention_id, error = %e, "Could not build intervention-response"))
            .ok()
        else {
            return;
        };
        if !self.transport.send(reply).await {
            warn!(
                agent_id = %message.from_agent,
                intervention_id = %intervention_id,
                "intervention-response not delivered"
            );
        }
    }

    fn on_intervention_response(&self, message: &AgentMessage) {
        let Ok(reply) = decode::<InterventionReply>(message) else {
            return;
        };
        let Some(value) = reply.response else {
            debug!(intervention_id = %reply.intervention_id, "Empty intervention-response ignored");
            return;
        };
        match serde_json::from_value::<InterventionResponse>(value) {
            Ok(response) => {
                if !self.resolve_intervention(reply.intervention_id, response) {
                    debug!(intervention_id = %reply.intervention_id, "Late intervention-response ignored");
                }
            }
            Err(e) => {
                warn!(intervention_id = %reply.intervention_id, error = %e, "Unreadable intervention decision");
            }
        }
    }

    fn on_heartbeat(&self, message: &AgentMessage) {
        let Ok(heartbeat) = decode::<AgentHeartbeat>(message) else {
            return;
        };
        if let Some(mut child) = self.children.get_mut(&heartbeat.agent_id) {
            child.last_heartbeat = Some(message.timestamp);
        }
    }

    async fn on_unregister(&self, message: &AgentMessage) {
        let Ok(unregister) = decode::<AgentUnregister>(message) else {
            return;
        };
        let Some(task_id) = self
            .children
            .get(&unregister.agent_id)
            .filter(|c| c.status == ChildStatus::Running)
            .map(|c| c.task_id)
        else {
            return;
        };

        let completion = ChildCompletion {
            agent_id: unregister.agent_id,
            task_id,
            success: false,
            output: String::new(),
            error: Some(
                unregister
                    .reason
                    .unwrap_or_else(|| "agent left before finishing".to_string()),
            ),
            result: None,
            execution_time_ms: 0,
        };
        self.finish_child(ChildStatus::Failed, completion).await;
    }
}

fn decode<P: conclave_protocol::Payload>(message: &AgentMessage) -> conclave_protocol::Result<P> {
    message.decode_payload::<P>().map_err(|e| {
        warn!(kind = %message.kind, from = %message.from_agent, error = %e, "Malformed payload dropped");
        e
    })
}
