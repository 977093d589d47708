//! Conclave Protocol - Message Envelope
//!
//! Every coordination transition between agents (task creation, progress,
//! interventions, registration, sync) travels as an [`AgentMessage`]. The
//! envelope is transport-agnostic: the wire layer only needs [`encode`] and
//! [`decode`] and never looks inside the payload.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "version": 1,
//!   "message_id": "8f0c...",            // canonical UUID string
//!   "from_agent": "orchestrator",
//!   "to_agent": "host",                  // omitted/null => broadcast
//!   "kind": "task-create",               // enum string value
//!   "timestamp": "2026-01-01T12:00:00Z", // ISO-8601
//!   "payload": { ... },                  // kind-specific object
//!   "correlation_id": null,
//!   "reply_to": null
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod payload;

pub use error::{ProtocolError, Result};
pub use message::{decode, encode, AgentMessage, MessageKind, PROTOCOL_VERSION};
pub use payload::{
    AgentHeartbeat, AgentRegister, AgentUnregister, BroadcastNotice, InterventionRequest,
    InterventionResponse, Payload, ProgressUpdate, SyncRequest, SyncResponse, TaskCancel,
    TaskComplete, TaskCreate, TaskFailed,
};
