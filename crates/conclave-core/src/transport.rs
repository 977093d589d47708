//! Transport contract
//!
//! The wire layer (WebSocket, HTTP, pane IPC) lives outside the core. The core
//! only needs to send, broadcast and register inbound handlers per kind.
//! Sends report failure as `false`; messaging is best-effort.

use async_trait::async_trait;
use conclave_protocol::{decode, encode, AgentMessage, MessageKind};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Inbound message handler
pub type MessageHandler = Arc<dyn Fn(AgentMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Message transport implemented by the wire layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to `message.to_agent`
    async fn send(&self, message: AgentMessage) -> bool;

    /// Deliver `message` to every connected agent
    async fn broadcast(&self, message: AgentMessage) -> bool;

    /// Route inbound messages of `kind` to `handler`
    fn register_handler(&self, kind: MessageKind, handler: MessageHandler);
}

type Responder = Arc<dyn Fn(&AgentMessage) -> Option<AgentMessage> + Send + Sync>;

/// In-process transport.
///
/// Every outbound message goes through the wire encoding and is recorded. An
/// optional responder plays the remote side: its replies are delivered to the
/// registered handlers on a spawned task, like a network round-trip.
#[derive(Default)]
pub struct LoopbackTransport {
    handlers: RwLock<HashMap<MessageKind, Vec<MessageHandler>>>,
    sent: Mutex<Vec<AgentMessage>>,
    responder: Option<Responder>,
}

impl LoopbackTransport {
    /// Transport that records messages and never answers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose remote side answers with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&AgentMessage) -> Option<AgentMessage> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::default()
        }
    }

    /// Messages sent or broadcast so far
    pub fn sent(&self) -> Vec<AgentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sent messages of one kind
    pub fn sent_of(&self, kind: MessageKind) -> Vec<AgentMessage> {
        self.sent().into_iter().filter(|m| m.kind == kind).collect()
    }

    /// Run the handlers registered for `message.kind`, in registration order.
    ///
    /// Returns the number of handlers run.
    pub async fn deliver(&self, message: AgentMessage) -> usize {
        let handlers = self.handlers_for(message.kind);
        for handler in &handlers {
            handler(message.clone()).await;
        }
        handlers.len()
    }

    fn handlers_for(&self, kind: MessageKind) -> Vec<MessageHandler> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn transmit(&self, message: AgentMessage) -> bool {
        let wire = match encode(&message) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Encode failed");
                return false;
            }
        };
        let message = match decode(&wire) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Outbound message failed validation");
                return false;
            }
        };
        debug!(kind = %message.kind, to = ?message.to_agent, "Loopback send");

        let reply = self.responder.as_ref().and_then(|respond| respond(&message));
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);

        if let Some(reply) = reply {
            let handlers = self.handlers_for(reply.kind);
            tokio::spawn(async move {
                for handler in handlers {
                    handler(reply.clone()).await;
                }
            });
        }
        true
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, message: AgentMessage) -> bool {
        if message.to_agent.is_none() {
            warn!(message_id = %message.message_id, "send() without recipient");
            return false;
        }
        self.transmit(message)
    }

    async fn broadcast(&self, mut message: AgentMessage) -> bool {
        message.to_agent = None;
        self.transmit(message)
    }

    fn register_handler(&self, kind: MessageKind, handler: MessageHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(kind)
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_protocol::{SyncResponse, TaskCancel};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_send_requires_recipient() {
        let transport = LoopbackTransport::new();
        let payload = TaskCancel {
            task_id: Uuid::new_v4(),
            reason: None,
        };
        let message = AgentMessage::from_payload("me", None, &payload).unwrap();
        assert!(!transport.send(message.clone()).await);
        assert!(transport.broadcast(message).await);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_responder_reply_reaches_handlers() {
        let transport = LoopbackTransport::with_responder(|m| {
            AgentMessage::reply(m, "host", &SyncResponse::ok()).ok()
        });
        let seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let counter = seen.clone();
        transport.register_handler(
            MessageKind::SyncResponse,
            Arc::new(move |reply: AgentMessage| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(reply.reply_to);
                }
                async {}.boxed()
            }),
        );

        let payload = TaskCancel {
            task_id: Uuid::new_v4(),
            reason: Some("user abort".into()),
        };
        let message = AgentMessage::from_payload("me", Some("host".into()), &payload).unwrap();
        let id = message.message_id;
        assert!(transport.send(message).await);

        assert_eq!(rx.await.unwrap(), Some(id));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deliver_counts_handlers() {
        let transport = LoopbackTransport::new();
        let noop: MessageHandler = Arc::new(|_| async {}.boxed());
        transport.register_handler(MessageKind::Broadcast, noop.clone());
        transport.register_handler(MessageKind::Broadcast, noop);

        let notice = conclave_protocol::BroadcastNotice {
            topic: "build".into(),
            data: serde_json::Value::Null,
        };
        let message = AgentMessage::from_payload("me", None, &notice).unwrap();
        assert_eq!(transport.deliver(message).await, 2);
    }
}
