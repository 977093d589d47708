//! Task dispatcher - worker loop and per-agent execution lanes
//!
//! ```text
//! submit ──► TaskQueue ──► worker loop ──► route (registry) ──► claims (coordinator)
//!                                                 │
//!                                                 ▼
//!                                   agent lane (FIFO, N permits) ──► execute_task
//! ```
//!
//! The worker never waits on a task: it routes and hands the task to the
//! agent's lane, then goes back to the queue. Each lane starts tasks in the
//! order it received them, at most `max_concurrent_tasks` at a time.
//!
//! Whatever way a task ends (result, error, panic, timeout, cancellation),
//! its in-flight entry, resource claims and load reservation are released
//! before completion observers run.
//!
//! Conflict adjustments the coordinator produces for an agent are fed to
//! each of that agent's in-flight tasks through [`TaskContext::adjustments`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{CodingAgent, TaskContext, TaskReporter};
use crate::coordinator::{AgentAdjustment, Coordinator};
use crate::error::{Error, Result};
use crate::event_bus::{CoordinationEvent, EventBus};
use crate::observers::ObserverRegistry;
use crate::queue::{QueueConfig, TaskQueue};
use crate::registry::AgentRegistry;
use crate::task::{AgentResult, AgentTask, TaskStatus};

type Job = (AgentTask, Arc<dyn CodingAgent>);

struct InFlight {
    agent: Arc<dyn CodingAgent>,
    status: TaskStatus,
    cancel: CancellationToken,
    adjustments: mpsc::UnboundedSender<AgentAdjustment>,
    /// Receiving end, moved into the task's context when it starts
    feed: Option<mpsc::UnboundedReceiver<AgentAdjustment>>,
}

enum Outcome {
    Finished(std::result::Result<anyhow::Result<AgentResult>, Box<dyn Any + Send>>),
    Cancelled,
    TimedOut,
}

/// Routes queued tasks to agents and runs them
pub struct TaskDispatcher {
    queue: TaskQueue,
    registry: Arc<AgentRegistry>,
    coordinator: Arc<Coordinator>,
    reporter: Arc<dyn TaskReporter>,
    events: EventBus,
    in_flight: Arc<DashMap<Uuid, InFlight>>,
    lanes: DashMap<String, mpsc::UnboundedSender<Job>>,
    completion_observers: ObserverRegistry<AgentResult>,
    shutdown: CancellationToken,
}

impl TaskDispatcher {
    /// Create a dispatcher
    pub fn new(
        queue: QueueConfig,
        registry: Arc<AgentRegistry>,
        coordinator: Arc<Coordinator>,
        reporter: Arc<dyn TaskReporter>,
        events: EventBus,
    ) -> Self {
        let in_flight: Arc<DashMap<Uuid, InFlight>> = Arc::new(DashMap::new());
        let tracked = Arc::downgrade(&in_flight);
        coordinator.on_adjustment(move |adjustment| {
            if let Some(in_flight) = tracked.upgrade() {
                forward_adjustment(&in_flight, adjustment);
            }
            Ok(())
        });

        Self {
            queue: TaskQueue::new(queue),
            registry,
            coordinator,
            reporter,
            events,
            in_flight,
            lanes: DashMap::new(),
            completion_observers: ObserverRegistry::new("completion"),
            shutdown: CancellationToken::new(),
        }
    }

    /// Observe every terminal result, routing failures included
    pub fn on_completion<F>(&self, observer: F)
    where
        F: Fn(&AgentResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.completion_observers.register(observer);
    }

    /// Enqueue a task; returns as soon as it is queued.
    ///
    /// Fails once the dispatcher is shut down, and for a task ID that is
    /// already in flight.
    pub fn submit(&self, task: AgentTask) -> Result<Uuid> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShutDown);
        }
        let task_id = task.id;
        if self.in_flight.contains_key(&task_id) {
            return Err(Error::DuplicateTask(task_id));
        }
        self.queue.submit(task)?;
        self.events.publish(CoordinationEvent::TaskQueued { task_id });
        Ok(task_id)
    }

    /// Spawn the worker loop
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    /// Worker loop: poll, route, hand off. Stops on [`TaskDispatcher::shutdown`].
    pub async fn run(self: Arc<Self>) {
        info!("Task dispatcher starting");
        let poll_interval = self.queue.poll_interval();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Task dispatcher shutting down");
                    break;
                }
                polled = self.queue.poll(poll_interval) => {
                    if let Some(task) = polled {
                        self.dispatch(task).await;
                    }
                }
            }
        }
        info!("Task dispatcher stopped");
    }

    /// Stop the worker and lanes, and cancel running tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.lanes.clear();
    }

    /// Run `task` now, bypassing the queue and the agent's lane.
    ///
    /// `agent_id` pins the task to one agent, which must be registered and
    /// capable. Routing failures come back as a failed result.
    pub async fn execute_immediately(&self, task: AgentTask, agent_id: Option<&str>) -> AgentResult {
        if self.shutdown.is_cancelled() {
            return AgentResult::failure(task.id, Error::ShutDown.to_string());
        }
        if self.in_flight.contains_key(&task.id) {
            return AgentResult::failure(task.id, Error::DuplicateTask(task.id).to_string());
        }
        let agent = match self.registry.reserve(&task, agent_id).await {
            Ok(agent) => agent,
            Err(e) => return self.unroutable(task.id, e.to_string()),
        };
        if !self.track(&task, &agent).await {
            return AgentResult::failure(task.id, Error::DuplicateTask(task.id).to_string());
        }
        self.run_task(task, agent).await
    }

    /// Request cooperative cancellation.
    ///
    /// Returns false if the task is not queued in a lane or running.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.in_flight.get(&task_id) {
            Some(entry) => {
                debug!(task_id = %task_id, agent_id = entry.agent.id(), "Cancelling task");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Status of an in-flight task, as the owning agent reports it
    pub async fn task_status(&self, task_id: Uuid) -> Option<TaskStatus> {
        let (agent, tracked) = self
            .in_flight
            .get(&task_id)
            .map(|e| (e.agent.clone(), e.status))?;
        Some(agent.task_status(task_id).await.unwrap_or(tracked))
    }

    /// Progress of an in-flight task, as the owning agent reports it
    pub async fn task_progress(&self, task_id: Uuid) -> Option<f32> {
        let agent = self.in_flight.get(&task_id).map(|e| e.agent.clone())?;
        agent.task_progress(task_id).await
    }

    /// Tasks routed but not finished
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Tasks waiting in the queue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    async fn dispatch(self: &Arc<Self>, task: AgentTask) {
        if self.in_flight.contains_key(&task.id) {
            warn!(task_id = %task.id, "Task already in flight, duplicate dropped");
            return;
        }
        let agent = match self.registry.reserve(&task, None).await {
            Ok(agent) => agent,
            Err(e) => {
                self.unroutable(task.id, e.to_string());
                return;
            }
        };
        if !self.track(&task, &agent).await {
            return;
        }

        let lane = self.lane_for(agent.id()).await;
        if let Err(mpsc::error::SendError((task, agent))) = lane.send((task, agent)) {
            let result = AgentResult::failure(task.id, "agent lane closed");
            self.finish(&task, agent.id(), result).await;
        }
    }

    fn unroutable(&self, task_id: Uuid, error: String) -> AgentResult {
        warn!(task_id = %task_id, error = %error, "Task not routable");
        let result = AgentResult::failure(task_id, error.clone());
        self.events
            .publish(CoordinationEvent::TaskFailed { task_id, error });
        self.completion_observers.notify(&result);
        result
    }

    /// Start tracking a routed task. False (and the reservation undone) if
    /// the ID is already in flight.
    async fn track(&self, task: &AgentTask, agent: &Arc<dyn CodingAgent>) -> bool {
        let inserted = match self.in_flight.entry(task.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let (adjustments, feed) = mpsc::unbounded_channel();
                slot.insert(InFlight {
                    agent: agent.clone(),
                    status: TaskStatus::Queued,
                    cancel: self.shutdown.child_token(),
                    adjustments,
                    feed: Some(feed),
                });
                true
            }
        };
        if !inserted {
            warn!(task_id = %task.id, agent_id = agent.id(), "Task already in flight, duplicate dropped");
            self.registry.release(agent.id()).await;
            return false;
        }

        // Adjustments for this very registration reach the task's feed
        self.coordinator
            .register_task(agent.id(), task, &task.resources, &task.dependencies)
            .await;
        true
    }

    async fn lane_for(self: &Arc<Self>, agent_id: &str) -> mpsc::UnboundedSender<Job> {
        if let Some(lane) = self.lanes.get(agent_id) {
            return lane.clone();
        }

        let limit = self
            .registry
            .agent_config(agent_id)
            .await
            .map_or(1, |c| c.max_concurrent_tasks.max(1));
        self.lanes
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(self.clone().run_lane(agent_id.to_string(), rx, limit));
                tx
            })
            .clone()
    }

    async fn run_lane(self: Arc<Self>, agent_id: String, mut jobs: mpsc::UnboundedReceiver<Job>, limit: usize) {
        debug!(agent_id = %agent_id, limit, "Agent lane started");
        let permits = Arc::new(Semaphore::new(limit));
        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = jobs.recv() => job,
            };
            let Some((task, agent)) = job else { break };

            // Taking the permit before spawning keeps lane order
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.abandon(task, agent).await;
                    break;
                }
                permit = permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                self.abandon(task, agent).await;
                break;
            };

            let dispatcher = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                dispatcher.run_task(task, agent).await;
            });
        }

        jobs.close();
        while let Ok((task, agent)) = jobs.try_recv() {
            self.abandon(task, agent).await;
        }
        debug!(agent_id = %agent_id, "Agent lane stopped");
    }

    async fn abandon(&self, task: AgentTask, agent: Arc<dyn CodingAgent>) {
        let result = AgentResult::cancelled(task.id);
        self.finish(&task, agent.id(), result).await;
    }

    async fn run_task(&self, mut task: AgentTask, agent: Arc<dyn CodingAgent>) -> AgentResult {
        let agent_id = agent.id().to_string();
        let (cancel, feed) = match self.in_flight.get_mut(&task.id) {
            Some(mut entry) => {
                entry.status = TaskStatus::Running;
                (entry.cancel.clone(), entry.feed.take())
            }
            None => (self.shutdown.child_token(), None),
        };

        if cancel.is_cancelled() {
            debug!(task_id = %task.id, agent_id = %agent_id, "Task cancelled before start");
            let result = AgentResult::cancelled(task.id);
            return self.finish(&task, &agent_id, result).await;
        }

        task.set_status(TaskStatus::Running);
        info!(task_id = %task.id, agent_id = %agent_id, task_type = %task.task_type, "Task started");
        self.events.publish(CoordinationEvent::TaskStarted {
            task_id: task.id,
            agent_id: agent_id.clone(),
        });

        let mut ctx = TaskContext::new(&agent_id, &task, self.reporter.clone(), cancel.clone());
        if let Some(feed) = feed {
            ctx = ctx.with_adjustments(feed);
        }
        let started = Instant::now();
        let deadline = task.timeout();

        let outcome = {
            let execution = AssertUnwindSafe(agent.execute_task(&task, ctx.clone())).catch_unwind();
            let expiry = async {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                finished = execution => Outcome::Finished(finished),
                _ = cancel.cancelled() => Outcome::Cancelled,
                _ = expiry => Outcome::TimedOut,
            }
        };

        let result = match outcome {
            Outcome::Finished(Ok(Ok(result))) => result,
            Outcome::Finished(Ok(Err(e))) => {
                warn!(task_id = %task.id, agent_id = %agent_id, error = %e, "Agent returned an error");
                AgentResult::failure(task.id, e.to_string())
            }
            Outcome::Finished(Err(panic)) => {
                let reason = panic_message(panic.as_ref());
                warn!(task_id = %task.id, agent_id = %agent_id, reason = %reason, "Agent panicked");
                AgentResult::failure(task.id, format!("agent panicked: {reason}"))
            }
            Outcome::Cancelled => {
                agent.cancel_task(task.id).await;
                AgentResult::cancelled(task.id)
            }
            Outcome::TimedOut => {
                cancel.cancel();
                agent.cancel_task(task.id).await;
                AgentResult::failure(task.id, "timed out")
            }
        };

        let result = ctx
            .take_journal()
            .await
            .merge_into(result)
            .with_execution_time(started.elapsed());
        self.finish(&task, &agent_id, result).await
    }

    /// Release bookkeeping and fan out. Runs for every routed task.
    async fn finish(&self, task: &AgentTask, agent_id: &str, result: AgentResult) -> AgentResult {
        self.in_flight.remove(&task.id);
        self.coordinator.release_task(task.id).await;
        self.registry.release(agent_id).await;

        let task_id = task.id;
        match result.terminal_status() {
            TaskStatus::Completed => {
                info!(task_id = %task_id, agent_id, duration_ms = result.execution_time_ms, "Task completed");
                self.events.publish(CoordinationEvent::TaskCompleted {
                    task_id,
                    agent_id: agent_id.to_string(),
                    duration_ms: result.execution_time_ms,
                });
            }
            TaskStatus::Cancelled => {
                info!(task_id = %task_id, agent_id, "Task cancelled");
                self.events
                    .publish(CoordinationEvent::TaskCancelled { task_id });
            }
            _ => {
                let error = result.error.clone().unwrap_or_default();
                warn!(task_id = %task_id, agent_id, error = %error, "Task failed");
                self.events
                    .publish(CoordinationEvent::TaskFailed { task_id, error });
            }
        }

        self.completion_observers.notify(&result);
        result
    }
}

/// Hand `adjustment` to every in-flight task of its agent; returns how many took it
fn forward_adjustment(in_flight: &DashMap<Uuid, InFlight>, adjustment: &AgentAdjustment) -> usize {
    in_flight
        .iter()
        .filter(|entry| entry.agent.id() == adjustment.agent_id)
        .filter(|entry| entry.adjustments.send(adjustment.clone()).is_ok())
        .count()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests;
