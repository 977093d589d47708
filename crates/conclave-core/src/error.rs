//! Error types for conclave-core
//!
//! This module provides the coordination error taxonomy and user-friendly
//! error formatting.

use thiserror::Error;
use uuid::Uuid;

use crate::task::Capability;

/// Routing failures. Recovered locally by callers (re-route or retry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No registered agent advertises every required capability
    #[error("no eligible agent for capabilities {required:?}")]
    NoEligibleAgent {
        /// Capabilities the task required
        required: Vec<Capability>,
    },

    /// A pinned agent is not registered
    #[error("agent '{0}' not found")]
    AgentNotFound(String),
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Agent initialization failed; the agent is not routable
    #[error("agent '{agent_id}' failed to initialize: {reason}")]
    Initialization {
        /// Agent that failed
        agent_id: String,
        /// Reported reason
        reason: String,
    },

    /// Task could not be routed
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Claim contention that needs resolution
    #[error("conflict: {0}")]
    Conflict(String),

    /// Send or acknowledgement failure
    #[error("transport error: {0}")]
    Transport(String),

    /// No response arrived before the intervention deadline
    #[error("intervention {0} timed out")]
    InterventionTimeout(Uuid),

    /// Agent reported a failure while executing a task
    #[error("execution error: {0}")]
    Execution(String),

    /// Task queue is at capacity
    #[error("task queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// A task with this ID is already queued in a lane or running
    #[error("task {0} is already in flight")]
    DuplicateTask(Uuid),

    /// The dispatcher was shut down and accepts no more work
    #[error("task dispatcher is shut down")]
    ShutDown,

    /// Envelope encode/decode failure
    #[error("protocol error: {0}")]
    Protocol(#[from] conclave_protocol::ProtocolError),

    /// Configuration error (invalid settings, duplicate subscriber)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error (closed channel, poisoned state)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Initialization { agent_id, .. } => {
                format!("Agent '{}' could not start and will not receive tasks.", agent_id)
            }
            Error::Routing(RoutingError::NoEligibleAgent { .. }) => {
                "No eligible agent is available for this task.".to_string()
            }
            Error::Routing(RoutingError::AgentNotFound(id)) => {
                format!("Agent '{}' is not registered.", id)
            }
            Error::Conflict(msg) => format!("Conflicting work detected: {}", msg),
            Error::Transport(_) => "Could not reach the agent host.".to_string(),
            Error::InterventionTimeout(_) => {
                "Nobody answered the approval request in time; the action was not taken."
                    .to_string()
            }
            Error::Execution(msg) => format!("Task failed: {}", msg),
            Error::QueueFull { .. } => "Too many tasks are waiting.".to_string(),
            Error::DuplicateTask(_) => "This task is already running.".to_string(),
            Error::ShutDown => "The workspace is shutting down; no new tasks are accepted.".to_string(),
            Error::Protocol(e) => format!("Malformed message: {}", e),
            Error::Configuration(msg) => format!("Configuration error: {}", msg),
            Error::Internal(msg) => format!("Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Routing(RoutingError::NoEligibleAgent { required }) => Some(format!(
                "Register an agent advertising {:?} or relax the task requirements.",
                required
            )),
            Error::QueueFull { .. } => {
                Some("Wait for running tasks to finish or raise queue.capacity.".to_string())
            }
            Error::Transport(_) => Some("Check that the agent host is running.".to_string()),
            Error::Configuration(_) => {
                Some("Check config/conclave.toml and CONCLAVE_* variables.".to_string())
            }
            _ => None,
        }
    }
}
