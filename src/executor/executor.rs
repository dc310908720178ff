//! Master/Worker Task Queue
//!
//! Drives one run of the queue. Every rank constructs a `TaskQueue` and calls
//! `run_until_complete`; the rank decides the part it plays.
//!
//! ## Responsibilities
//! - **Root**: Owns the backlog, pushes a task to each idle worker, records
//!   every result as it arrives and hands the reporting worker its next task.
//!   Once the backlog is empty and nothing is in flight it sends one `EndTask`
//!   per worker.
//! - **Worker**: Receives a task, runs the handler registered for its kind,
//!   reports a `TaskResult`, and stops at `EndTask`.
//! - **Single process**: With no workers the root runs every task itself, in
//!   backlog order.
//!
//! Failures follow `QueueConfig::failure_policy`: under `Abort` a task that
//! still fails after its retries aborts the whole run; under
//! `ContinueOnFailure` it is recorded as a failed result.

use super::protocol::{DispatchMessage, WorkerMessage};
use super::queue::{Backlog, ResultStore};
use super::registry::TaskHandlerRegistry;
use super::types::*;
use crate::abort;
use crate::comm::Communicator;
use crate::comm::types::{Rank, Tag};
use crate::config::{FailurePolicy, QueueConfig};
use crate::error::{Error, Result};
use crate::roles::gate::Gated;
use crate::roles::identity::{ProcessIdentity, ROOT_RANK};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub struct TaskQueue {
    comm: Communicator,
    /// Registry containing the actual code for each task kind.
    handlers: Arc<TaskHandlerRegistry>,
    config: QueueConfig,
    backlog: Backlog,
    submitted: HashSet<TaskId>,
    /// Root-side lifecycle record of every dispatched task.
    tasks: HashMap<TaskId, Task>,
    dispatch_state: DispatchState,
    worker_state: WorkerState,
    /// Tasks executed by this rank.
    executed: usize,
    closed: bool,
}

impl TaskQueue {
    pub fn new(
        comm: Communicator,
        handlers: Arc<TaskHandlerRegistry>,
        config: QueueConfig,
    ) -> Self {
        let backlog = Backlog::new(config.backlog_policy);
        Self {
            comm,
            handlers,
            config,
            backlog,
            submitted: HashSet::new(),
            tasks: HashMap::new(),
            dispatch_state: DispatchState::Idle,
            worker_state: WorkerState::Waiting,
            executed: 0,
            closed: false,
        }
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.comm.identity()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatch_state
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker_state
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    pub fn executed_count(&self) -> usize {
        self.executed
    }

    /// Lifecycle record of a task this root dispatched (or ran itself).
    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Adds `task` to the backlog. Root only.
    pub fn submit(&mut self, task: Task) -> Result<()> {
        if !self.identity().is_root() {
            return Err(Error::RootOnly { operation: "submit" });
        }
        if self.closed {
            return Err(Error::QueueClosed {
                rank: self.comm.rank(),
            });
        }
        if !self.submitted.insert(task.task_id.clone()) {
            return Err(Error::DuplicateTask(task.task_id.to_string()));
        }

        tracing::debug!("Submitted task {} ({})", task.task_id, task.kind);
        self.backlog.push(task);
        Ok(())
    }

    /// Runs the queue to completion. Every rank must call this.
    ///
    /// The root gets `Executed` with a result for every submitted task;
    /// workers get `NotExecuted` once they have received `EndTask`. Any fatal
    /// error aborts the whole run.
    pub async fn run_until_complete(&mut self) -> Result<Gated<ResultStore>> {
        if self.closed {
            return Err(Error::QueueClosed {
                rank: self.comm.rank(),
            });
        }
        self.closed = true;

        let comm = self.comm.clone();
        let identity = self.identity();

        abort::guard(&comm, async {
            if identity.worker_count() == 0 {
                self.run_serial().await.map(Gated::Executed)
            } else if identity.is_root() {
                self.run_root().await.map(Gated::Executed)
            } else {
                self.run_worker().await?;
                Ok(Gated::NotExecuted)
            }
        })
        .await
    }

    // --- Root ---

    async fn run_root(&mut self) -> Result<ResultStore> {
        let identity = self.identity();
        let mut results = ResultStore::new(self.submitted.len());
        let mut in_flight: Vec<Option<TaskId>> = vec![None; identity.world_size()];

        tracing::info!(
            "Running {} tasks on {} workers",
            self.backlog.len(),
            identity.worker_count()
        );

        self.transition(DispatchState::Dispatching);
        for worker in identity.worker_ranks() {
            if self.backlog.is_empty() {
                break;
            }
            self.dispatch(worker, &mut in_flight).await?;
        }

        self.transition(DispatchState::Draining);
        while in_flight.iter().any(Option::is_some) {
            let (source, message) = self
                .comm
                .receive_any::<WorkerMessage>(Tag::TaskQueue)
                .await?;

            match message {
                WorkerMessage::Completed(result) => {
                    let expected = in_flight.get_mut(source).and_then(Option::take);
                    if expected.as_ref() != Some(&result.task_id) {
                        return Err(Error::Protocol(format!(
                            "worker {} reported task {} but was assigned {:?}",
                            source, result.task_id, expected
                        )));
                    }

                    self.record(result, &mut results)?;
                    self.dispatch(source, &mut in_flight).await?;
                }
                WorkerMessage::Terminated { rank } => {
                    return Err(Error::Protocol(format!(
                        "worker {} terminated before shutdown",
                        rank
                    )));
                }
            }
        }

        self.transition(DispatchState::ShuttingDown);
        self.shutdown_workers().await?;
        self.transition(DispatchState::Done);

        if !results.is_complete() {
            return Err(Error::Protocol(format!(
                "run finished with {} of {} results",
                results.len(),
                results.expected()
            )));
        }

        tracing::info!("All {} tasks completed", results.len());
        Ok(results)
    }

    /// Sends the next backlog task to `worker`; does nothing once the backlog is empty.
    async fn dispatch(&mut self, worker: Rank, in_flight: &mut [Option<TaskId>]) -> Result<()> {
        let Some(mut task) = self.backlog.pop() else {
            return Ok(());
        };

        task.started_at = Some(now_ms());
        task.assigned_worker = Some(worker);

        tracing::debug!(
            "Dispatching task {} ({}) to worker {}",
            task.task_id,
            task.kind,
            worker
        );
        self.comm
            .send(&DispatchMessage::Run(task.clone()), worker, Tag::TaskQueue)
            .await?;

        in_flight[worker] = Some(task.task_id.clone());
        self.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    fn record(&mut self, result: TaskResult, results: &mut ResultStore) -> Result<()> {
        if let TaskOutcome::Failed { error } = &result.outcome {
            if self.config.failure_policy == FailurePolicy::Abort {
                return Err(Error::TaskExecutionFailure {
                    task_id: result.task_id.to_string(),
                    reason: error.clone(),
                });
            }
            tracing::warn!(
                "Task {} failed on worker {}: {}",
                result.task_id,
                result.worker_rank,
                error
            );
        } else {
            tracing::info!(
                "Task {} completed on worker {} in {:?}",
                result.task_id,
                result.worker_rank,
                result.execution_time
            );
        }

        if let Some(task) = self.tasks.get_mut(&result.task_id) {
            task.completed_at = Some(result.completed_at);
        }
        results.record(result)
    }

    async fn shutdown_workers(&mut self) -> Result<()> {
        let workers = self.identity().worker_ranks();

        for worker in workers.clone() {
            self.comm
                .send(&DispatchMessage::EndTask, worker, Tag::TaskQueue)
                .await?;
        }

        if !self.config.require_shutdown_ack {
            return Ok(());
        }

        let mut pending: HashSet<Rank> = workers.collect();
        while !pending.is_empty() {
            let (source, message) = self
                .comm
                .receive_any::<WorkerMessage>(Tag::TaskQueue)
                .await?;

            match message {
                WorkerMessage::Terminated { rank } if rank == source => {
                    if !pending.remove(&rank) {
                        return Err(Error::Protocol(format!(
                            "worker {} acknowledged shutdown twice",
                            rank
                        )));
                    }
                    tracing::debug!("Worker {} acknowledged shutdown", rank);
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message from worker {} during shutdown: {:?}",
                        source, other
                    )));
                }
            }
        }

        Ok(())
    }

    fn transition(&mut self, next: DispatchState) {
        tracing::info!("Dispatch state {:?} -> {:?}", self.dispatch_state, next);
        self.dispatch_state = next;
    }

    // --- Worker ---

    async fn run_worker(&mut self) -> Result<()> {
        let rank = self.comm.rank();
        tracing::info!("Worker {} started", rank);

        loop {
            self.worker_state = WorkerState::Waiting;
            let message: DispatchMessage = self.comm.receive(ROOT_RANK, Tag::TaskQueue).await?;

            match message {
                DispatchMessage::EndTask => {
                    self.worker_state = WorkerState::Terminated;
                    if self.config.require_shutdown_ack {
                        self.comm
                            .send(&WorkerMessage::Terminated { rank }, ROOT_RANK, Tag::TaskQueue)
                            .await?;
                    }
                    tracing::info!("Worker {} terminated after {} tasks", rank, self.executed);
                    return Ok(());
                }
                DispatchMessage::Run(task) => {
                    self.worker_state = WorkerState::Executing;
                    let result = self.execute(&task).await?;
                    self.executed += 1;
                    self.comm
                        .send(&WorkerMessage::Completed(result), ROOT_RANK, Tag::TaskQueue)
                        .await?;
                }
            }
        }
    }

    /// Runs `task` with retries and applies the failure policy to the final attempt.
    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        let started = Instant::now();
        let mut attempt = 0;

        let outcome = loop {
            match self.handlers.execute(task).await {
                Ok(value) => break TaskOutcome::Success { value },
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Task {} failed (attempt {} of {}): {:#}",
                        task.task_id,
                        attempt,
                        self.config.max_retries + 1,
                        e
                    );
                }
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::Abort => {
                        return Err(Error::TaskExecutionFailure {
                            task_id: task.task_id.to_string(),
                            reason: format!("{:#}", e),
                        });
                    }
                    FailurePolicy::ContinueOnFailure => {
                        break TaskOutcome::Failed {
                            error: format!("{:#}", e),
                        };
                    }
                },
            }
        };

        Ok(TaskResult {
            task_id: task.task_id.clone(),
            outcome,
            execution_time: started.elapsed(),
            worker_rank: self.comm.rank(),
            completed_at: now_ms(),
        })
    }

    // --- Single process ---

    async fn run_serial(&mut self) -> Result<ResultStore> {
        let mut results = ResultStore::new(self.submitted.len());
        tracing::info!("Running {} tasks without workers", self.backlog.len());

        self.transition(DispatchState::Dispatching);
        while let Some(mut task) = self.backlog.pop() {
            task.started_at = Some(now_ms());
            task.assigned_worker = Some(ROOT_RANK);

            self.worker_state = WorkerState::Executing;
            let result = self.execute(&task).await?;
            self.executed += 1;

            self.tasks.insert(task.task_id.clone(), task);
            self.record(result, &mut results)?;
        }

        self.worker_state = WorkerState::Terminated;
        self.transition(DispatchState::Done);
        Ok(results)
    }
}
