//! EventBus - broadcast-based event system for coordination events.
//!
//! Publishes task, conflict, intervention and child-agent events so that UI
//! panes, telemetry exporters and other out-of-core subscribers can follow
//! the coordination layer without registering in-process callbacks.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::coordinator::ConflictKind;
use crate::orchestrator::ChildStatus;

/// Events emitted by the coordination core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// Task accepted into the queue
    TaskQueued {
        /// Task identifier
        task_id: Uuid,
    },
    /// Task started on an agent
    TaskStarted {
        /// Task identifier
        task_id: Uuid,
        /// Executing agent
        agent_id: String,
    },
    /// Task completed successfully
    TaskCompleted {
        /// Task identifier
        task_id: Uuid,
        /// Executing agent (empty when routing failed)
        agent_id: String,
        /// Execution duration in milliseconds
        duration_ms: u64,
    },
    /// Task failed
    TaskFailed {
        /// Task identifier
        task_id: Uuid,
        /// Error description
        error: String,
    },
    /// Task was cancelled
    TaskCancelled {
        /// Task identifier
        task_id: Uuid,
    },
    /// Conflicting claims were detected and resolved
    ConflictDetected {
        /// Resolution identifier
        conflict_id: Uuid,
        /// Conflict kind
        kind: ConflictKind,
        /// Agents involved
        agents: Vec<String>,
    },
    /// An agent asked for a human decision
    InterventionRequested {
        /// Intervention identifier
        intervention_id: Uuid,
        /// Requesting agent
        agent_id: String,
    },
    /// An intervention received its decision (or timed out)
    InterventionResolved {
        /// Intervention identifier
        intervention_id: Uuid,
        /// Whether a decision arrived before the deadline
        answered: bool,
    },
    /// A child agent was provisioned on the host
    ChildCreated {
        /// Child agent identifier
        agent_id: String,
        /// Task the child runs
        task_id: Uuid,
    },
    /// A child agent changed status
    ChildStatusChanged {
        /// Child agent identifier
        agent_id: String,
        /// New status
        status: ChildStatus,
    },
}

/// Broadcast-based event bus.
///
/// Uses `tokio::broadcast` so multiple subscribers can receive the same events.
/// Slow subscribers will miss events (lagged) rather than blocking the publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events. Returns a receiver that will get all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: CoordinationEvent) -> usize {
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let task_id = Uuid::new_v4();
        bus.publish(CoordinationEvent::TaskStarted {
            task_id,
            agent_id: "reviewer".to_string(),
        });

        match rx.recv().await.unwrap() {
            CoordinationEvent::TaskStarted { task_id: id, agent_id } => {
                assert_eq!(id, task_id);
                assert_eq!(agent_id, "reviewer");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.publish(CoordinationEvent::TaskCancelled {
                task_id: Uuid::new_v4()
            }),
            0
        );
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(4);
        let mut early = bus.subscribe();
        bus.publish(CoordinationEvent::TaskCancelled { task_id: Uuid::nil() });
        let mut late = bus.subscribe();

        assert!(matches!(
            tokio_test::block_on(early.recv()),
            Ok(CoordinationEvent::TaskCancelled { .. })
        ));
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = CoordinationEvent::ConflictDetected {
            conflict_id: Uuid::nil(),
            kind: ConflictKind::File,
            agents: vec!["x".into(), "y".into()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflict_detected");
        assert_eq!(json["kind"], "file");
    }
}
