//! Conclave Core - Multi-Agent Coordination
//!
//! This crate provides the coordination layer for workspaces where several
//! coding agents work side by side, including:
//! - Registry: Capability-indexed agents and least-loaded routing
//! - Dispatcher: Task queue, worker loop and per-agent execution lanes
//! - Coordinator: Resource claims, conflict detection/resolution, goal planning
//! - Orchestrator: Child agents on a host, intervention arbitration
//! - Hub: One wired context per workspace
//!
//! Messages between agents use the envelope from `conclave-protocol`; the
//! wire itself is supplied through the [`Transport`] trait.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod hub;
pub mod intervention;
pub mod logging;
pub mod observers;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod task;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{AgentConfig, CodingAgent, NoopReporter, TaskContext, TaskReporter};
pub use config::{load_config, load_config_from_str, CoreConfig};
pub use coordinator::{
    AgentAdjustment, AgentProfile, CollaborationKind, CollaborationOutcome, ConflictKind,
    ConflictResolution, CoordinationPlan, CoordinationStrategy, Coordinator, CoordinatorConfig,
    DenyRule, PlannedSubtask, Resolution, ResourceClaim, TimeSlot,
};
pub use dispatcher::TaskDispatcher;
pub use error::{Error, Result, RoutingError, UserFriendlyError};
pub use event_bus::{CoordinationEvent, EventBus};
pub use hub::CoordinationHub;
pub use intervention::{InterventionHandler, InterventionKind, InterventionResponse, UserIntervention};
pub use logging::{init_logging, LoggingConfig};
pub use observers::ObserverRegistry;
pub use orchestrator::{
    ChildAgentHandle, ChildCompletion, ChildStatus, Orchestrator, OrchestratorConfig,
    ProgressEvent, ADJUSTMENT_TOPIC,
};
pub use queue::{QueueConfig, TaskQueue};
pub use registry::AgentRegistry;
pub use task::{AgentResult, AgentTask, Capability, TaskStatus};
pub use transport::{LoopbackTransport, MessageHandler, Transport};
