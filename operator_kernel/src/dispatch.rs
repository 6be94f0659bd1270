//! Task dispatch: kernel-mediated agent turns, the run-and-wait wrapper and
//! the worker pool that drains the scheduler asynchronously.
//!
//! Every dequeued task is marked done exactly once, whatever its outcome, and
//! its result is delivered to the caller waiting on that task id (if any).

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::agent::{AccessDenied, AgentRequest, RunOutcome};
use crate::error::{KernelError, KernelResult};
use crate::gateway::CompletionOptions;
use crate::kernel::Kernel;
use crate::scheduler::Task;

type Waiter = oneshot::Sender<KernelResult<RunOutcome>>;

/// Payload carried by agent tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub prompt: String,
    #[serde(default)]
    pub options: CompletionOptions,
}

/// Dispatch bookkeeping owned by the kernel.
#[derive(Debug)]
pub(crate) struct DispatchState {
    waiters: DashMap<String, Waiter>,
    wake: Notify,
    workers: watch::Sender<usize>,
    shutdown: CancellationToken,
}

impl DispatchState {
    pub(crate) fn new() -> Self {
        let (workers, _) = watch::channel(0);
        Self {
            waiters: DashMap::new(),
            wake: Notify::new(),
            workers,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn active_workers(&self) -> usize {
        *self.workers.borrow()
    }
}

impl Kernel {
    /// Queue a task for `agent` without waiting for it.
    ///
    /// The task runs when a worker (or a run-and-wait caller) drains the queue.
    pub fn submit_task(&self, agent: &str, payload: Value, priority: i64) -> Task {
        self.enqueue(Uuid::new_v4().to_string(), agent, payload, priority, None)
    }

    /// Like [`submit_task`](Self::submit_task) with a caller-chosen id.
    /// Id uniqueness is not checked.
    pub fn submit_task_with_id(
        &self,
        id: String,
        agent: &str,
        payload: Value,
        priority: i64,
    ) -> Task {
        self.enqueue(id, agent, payload, priority, None)
    }

    fn enqueue(
        &self,
        id: String,
        agent: &str,
        payload: Value,
        priority: i64,
        waiter: Option<Waiter>,
    ) -> Task {
        // The waiter must exist before a worker can pop the task.
        if let Some(waiter) = waiter {
            self.dispatch.waiters.insert(id.clone(), waiter);
        }
        let task = self.scheduler().submit(id, agent, payload, priority);
        self.dispatch.wake.notify_one();
        task
    }

    /// Submit a turn for `agent` and wait for its outcome.
    ///
    /// With a running [`WorkerPool`] this just waits. Otherwise the caller
    /// drains the queue itself, in policy order, until its own task is done.
    #[instrument(skip(self, prompt, options))]
    pub async fn run(
        &self,
        agent: &str,
        prompt: &str,
        options: CompletionOptions,
    ) -> KernelResult<RunOutcome> {
        if !self.has_agent(agent) {
            return Err(KernelError::not_found("agent", agent));
        }

        let (tx, mut rx) = oneshot::channel();
        let payload = serde_json::to_value(TaskPayload {
            prompt: prompt.to_string(),
            options,
        })?;
        let task = self.enqueue(Uuid::new_v4().to_string(), agent, payload, 0, Some(tx));
        let lost = || KernelError::Dispatch(task.id.clone());

        let mut workers = self.dispatch.workers.subscribe();
        loop {
            let active = *workers.borrow_and_update();
            if active > 0 {
                tokio::select! {
                    result = &mut rx => return result.map_err(|_| lost())?,
                    // Pool started or stopped; re-evaluate who drains.
                    _ = workers.changed() => continue,
                }
            }

            match rx.try_recv() {
                Ok(result) => return result,
                Err(oneshot::error::TryRecvError::Closed) => return Err(lost()),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }

            if self.process_next().await.is_none() {
                // Our task was taken by another caller and is still running.
                return rx.await.map_err(|_| lost())?;
            }
        }
    }

    /// Pop one task under the scheduler policy and execute it.
    pub async fn process_next(&self) -> Option<Task> {
        let cancel = self.dispatch.shutdown.clone();
        self.process_next_with(&cancel).await
    }

    /// Execute queued tasks until the queue is empty; returns them completed.
    pub async fn drain(&self) -> Vec<Task> {
        let mut done = Vec::new();
        while let Some(task) = self.process_next().await {
            done.push(task);
        }
        done
    }

    /// Cancel in-flight provider calls made by this kernel's tasks.
    pub fn shutdown(&self) {
        self.dispatch.shutdown.cancel();
    }

    pub(crate) async fn process_next_with(&self, cancel: &CancellationToken) -> Option<Task> {
        let task = self.scheduler().next()?;
        let outcome = self.execute_task(&task, cancel).await;

        let result = match &outcome {
            Ok(outcome) => serde_json::to_value(outcome)
                .unwrap_or_else(|e| json!({ "error": e.to_string() })),
            Err(e) => {
                warn!("Task {} for agent '{}' failed: {}", task.id, task.agent, e);
                json!({ "error": e.to_string() })
            }
        };
        let done = self.scheduler().mark_done(task, result);

        if let Some((_, waiter)) = self.dispatch.waiters.remove(&done.id) {
            if waiter.send(outcome).is_err() {
                debug!("Submitter of task {} stopped waiting", done.id);
            }
        }
        Some(done)
    }

    async fn execute_task(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> KernelResult<RunOutcome> {
        let payload: TaskPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| KernelError::InvalidTask(format!("task {}: {}", task.id, e)))?;
        self.run_turn(&task.agent, payload, cancel.child_token()).await
    }

    /// access check, user context push, agent, assistant context push, evaluation
    #[instrument(skip(self, payload, cancel))]
    async fn run_turn(
        &self,
        agent_name: &str,
        payload: TaskPayload,
        cancel: CancellationToken,
    ) -> KernelResult<RunOutcome> {
        let registered = self
            .agent(agent_name)
            .ok_or_else(|| KernelError::not_found("agent", agent_name))?;
        let tool = registered.agent.required_tool().to_string();

        let decision = self.access().decide(agent_name, &tool);
        if !decision.allowed {
            return Ok(RunOutcome::Denied(AccessDenied {
                principal: decision.principal,
                tool: decision.tool,
                role: decision.role,
            }));
        }

        let session_id = registered.session_id;
        self.context().push(&session_id, "user", payload.prompt.as_str());

        let request = AgentRequest {
            prompt: payload.prompt,
            options: payload.options,
            session_id: session_id.clone(),
            cancel,
        };
        let reply = registered.agent.handle(self, &request).await?;

        self.context().push(&session_id, "assistant", reply.response.as_str());
        self.evaluation().evaluate(agent_name, &request.prompt, &reply.response, None);
        Ok(RunOutcome::Completed(reply))
    }
}

/// Tokio workers that drain the kernel's scheduler as tasks arrive.
pub struct WorkerPool {
    kernel: Arc<Kernel>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub fn start(kernel: Arc<Kernel>, workers: usize) -> Self {
        let cancel = kernel.dispatch.shutdown.child_token();
        kernel.dispatch.workers.send_modify(|n| *n += workers);

        let handles = (0..workers)
            .map(|worker_id| {
                let kernel = kernel.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker_loop(worker_id, kernel, cancel).await })
            })
            .collect();

        info!("Started worker pool with {} workers", workers);
        Self {
            kernel,
            cancel,
            handles,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop the workers, cancelling provider calls still in flight.
    ///
    /// Tasks still queued stay queued; run-and-wait callers pick them up.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let workers = self.handles.len();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("Worker panicked: {}", e);
            }
        }
        self.kernel.dispatch.workers.send_modify(|n| *n -= workers);
        info!("Worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, kernel: Arc<Kernel>, cancel: CancellationToken) {
    debug!("Worker {} started", worker_id);
    loop {
        while !cancel.is_cancelled() {
            if kernel.process_next_with(&cancel).await.is_none() {
                break;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = kernel.dispatch.wake.notified() => {}
        }
    }
    debug!("Worker {} stopped", worker_id);
}
