//! Task Queue
//!
//! Bounded FIFO between `submit` and the dispatcher's worker loop.
//! Submissions past the bound are rejected instead of growing memory.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::task::{AgentTask, TaskStatus};

/// Configuration for the task queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued (not yet dispatched) tasks
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Upper bound on one worker poll, so shutdown is noticed promptly
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Bounded task queue
pub struct TaskQueue {
    config: QueueConfig,
    sender: mpsc::Sender<AgentTask>,
    receiver: Mutex<mpsc::Receiver<AgentTask>>,
}

impl TaskQueue {
    /// Create a new task queue.
    pub fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        Self {
            config,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Enqueue a task without waiting.
    pub fn submit(&self, mut task: AgentTask) -> Result<()> {
        task.set_status(TaskStatus::Queued);
        let task_id = task.id;
        self.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull {
                capacity: self.config.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => {
                Error::Internal("task queue closed".to_string())
            }
        })?;
        debug!(task_id = %task_id, queued = self.len(), "Task queued");
        Ok(())
    }

    /// Wait up to `timeout` for the next task.
    pub async fn poll(&self, timeout: Duration) -> Option<AgentTask> {
        let mut receiver = self.receiver.lock().await;
        tokio::time::timeout(timeout, receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Number of tasks waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Worker poll bound
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }
}

#[cfg(test)]
mod tests;
