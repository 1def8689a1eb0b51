//! Dispatcher: owns the worker pools, the retry policy and every task state
//! transition.
//!
//! Flow for one task:
//! 1. `submit` checks the registry, records the task as Waiting.
//! 2. `schedule` moves it to Processing and queues a job on the shared pool
//!    (or on a task-scoped pool when a worker count was requested).
//! 3. A worker claims the job, resolves the handler, runs it on its own tokio
//!    task so a panic cannot take the worker down.
//! 4. The outcome is committed: Success, back to Waiting for a retry, or Error.
//! 5. On a terminal commit the callback is taken out of the record and invoked
//!    after the store lock is released.

mod options;


pub use options::{ExecOptions, SubmitOptions};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;

use crate::config::DispatcherConfig;
use crate::domain::{
    FailureDisposition, Task, TaskCallback, TaskId, TaskResult, TaskStatus, TaskType,
    TransitionError,
};
use crate::error::DispatchError;
use crate::observability::{StatusCounts, TaskEvent};
use crate::pool::{Job, JobRunner, WorkerPool};
use crate::registry::{HandlerRegistry, TaskHandler};
use crate::store::TaskStore;

pub const NO_HANDLER_MESSAGE: &str = "no handler registered";
pub const CANCELED_MESSAGE: &str = "canceled";

/// Handle to a dispatcher. Cheap to clone; every clone drives the same pools
/// and store.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<Core>,
}

struct Core {
    me: Weak<Core>,
    config: DispatcherConfig,
    store: Arc<TaskStore>,
    registry: Arc<HandlerRegistry>,
    shared: WorkerPool,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry.
    ///
    /// Spawns the shared workers, so it must be called inside a tokio runtime.
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_registry(config, Arc::new(HandlerRegistry::new()))
    }

    pub fn with_registry(config: DispatcherConfig, registry: Arc<HandlerRegistry>) -> Self {
        let tracker = TaskTracker::new();
        let core = Arc::new_cyclic(|me: &Weak<Core>| {
            let runner: Weak<dyn JobRunner> = me.clone();
            let shared = WorkerPool::spawn("shared", config.default_workers, &tracker, runner);
            Core {
                me: me.clone(),
                config,
                store: Arc::new(TaskStore::new()),
                registry,
                shared,
                tracker: tracker.clone(),
                closed: AtomicBool::new(false),
            }
        });
        tracing::info!(
            pool = core.shared.name(),
            workers = core.shared.size(),
            auto_start = core.config.auto_start,
            max_retry = core.config.retry.max_retry,
            "dispatcher started"
        );
        Self { core }
    }

    pub fn register(&self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) {
        self.core.registry.register(task_type, handler);
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.core.registry
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.core.store
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.core.config
    }

    /// Admit a task and, unless deferred, schedule it.
    ///
    /// Fails without touching the store when no handler is registered for the
    /// task's type, the task is not Waiting, its id was already submitted, or
    /// the dispatcher is shut down.
    pub fn submit(&self, task: Task, options: SubmitOptions) -> Result<Task, DispatchError> {
        let core = &self.core;
        if !core.registry.contains(task.task_type()) {
            tracing::warn!(
                task_type = %task.task_type(),
                name = task.name(),
                "rejected task with unregistered type"
            );
            return Err(DispatchError::HandlerNotRegistered(task.task_type().clone()));
        }
        if task.status() != TaskStatus::Waiting {
            return Err(DispatchError::NotWaiting {
                task_id: task.id(),
                status: task.status(),
            });
        }
        if core.is_closed() {
            return Err(DispatchError::Closed);
        }

        let id = task.id();
        let task_type = task.task_type().clone();
        let name = task.name().to_string();
        // check-and-insert under one lock: a clone of a stored task is refused
        core.store.insert_new(task)?;
        tracing::info!(task_id = %id, task_type = %task_type, name = %name, "task submitted");

        if options.execute_now.unwrap_or(core.config.auto_start) {
            core.schedule(id, options.into())?;
        }
        core.store.get(id).ok_or(DispatchError::TaskNotFound(id))
    }

    /// Schedule a known task.
    ///
    /// Returns `Ok(false)` without doing anything when the task is not Waiting
    /// (already Processing, or terminal).
    pub fn execute(&self, id: TaskId, options: ExecOptions) -> Result<bool, DispatchError> {
        if self.core.is_closed() {
            return Err(DispatchError::Closed);
        }
        self.core.schedule(id, options)
    }

    /// Schedule every Waiting task. Returns how many were scheduled.
    pub fn start_all(&self, options: ExecOptions) -> usize {
        if self.core.is_closed() {
            return 0;
        }
        let waiting: Vec<TaskId> = self
            .core
            .store
            .list_all()
            .iter()
            .filter(|t| t.status() == TaskStatus::Waiting)
            .map(Task::id)
            .collect();

        let scheduled = waiting
            .into_iter()
            .filter(|id| matches!(self.core.schedule(*id, options), Ok(true)))
            .count();
        tracing::debug!(scheduled, "start_all");
        scheduled
    }

    /// Cancel a task that is queued but not yet started by a worker.
    ///
    /// Returns `Ok(false)` if it is already running or finished.
    pub fn cancel(&self, id: TaskId) -> Result<bool, DispatchError> {
        if !self.core.store.contains(id) {
            return Err(DispatchError::TaskNotFound(id));
        }
        Ok(self.core.cancel_unstarted(id))
    }

    /// Wait until the task reaches a terminal status.
    ///
    /// Returns false on timeout or for an unknown id. `None` waits forever.
    pub async fn await_completion(&self, id: TaskId, timeout: Option<Duration>) -> bool {
        let store = &self.core.store;
        // subscribe before the first check so no commit slips in between
        let mut revisions = store.watch_revisions();
        let wait = async {
            loop {
                match store.status(id) {
                    None => return false,
                    Some(status) if status.is_terminal() => return true,
                    Some(_) => {}
                }
                if revisions.changed().await.is_err() {
                    return false;
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    /// Stop accepting work.
    ///
    /// Tasks still queued on the shared pool are canceled. With `wait`, returns
    /// once every in-flight execution (scoped pools and pending retries
    /// included) has finished.
    pub async fn shutdown(&self, wait: bool) {
        let core = &self.core;
        if !core.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(wait, "dispatcher shutting down");
            for job in core.shared.close() {
                core.cancel_unstarted(job.task_id);
            }
            core.tracker.close();
        }
        if wait {
            core.tracker.wait().await;
            tracing::info!("dispatcher stopped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.core.store.get(id)
    }

    pub fn list_all(&self) -> Vec<Task> {
        self.core.store.list_all()
    }

    pub fn counts(&self) -> StatusCounts {
        self.core.store.counts()
    }

    pub fn is_done(&self, id: TaskId) -> bool {
        self.core
            .store
            .status(id)
            .is_some_and(TaskStatus::is_terminal)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.core.store.subscribe()
    }
}

impl Core {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waiting -> Processing, then hand the task to a pool.
    fn schedule(&self, id: TaskId, options: ExecOptions) -> Result<bool, DispatchError> {
        if let Err(refused) = self.store.update(id, |t| t.mark_processing())? {
            tracing::debug!(
                task_id = %id,
                status = %refused.from,
                "task not schedulable, skipping"
            );
            return Ok(false);
        }

        if self.is_closed() {
            self.cancel_unstarted(id);
            return Ok(false);
        }

        let job = Job {
            task_id: id,
            options,
            release: None,
        };
        let refused = match options.workers {
            None => self.shared.push(job).err(),
            Some(workers) => {
                let runner: Weak<dyn JobRunner> = self.me.clone();
                let pool =
                    WorkerPool::spawn(format!("scoped-{id}"), workers, &self.tracker, runner);
                let job = Job {
                    release: Some(pool.release_handle()),
                    ..job
                };
                pool.push(job).err()
            }
        };

        if let Some(job) = refused {
            // pool closed between the check above and the push
            self.cancel_unstarted(job.task_id);
            return Ok(false);
        }
        tracing::debug!(
            task_id = %id,
            workers = ?options.workers,
            shared_queued = self.shared.queued(),
            "task scheduled"
        );
        Ok(true)
    }

    fn cancel_unstarted(&self, id: TaskId) -> bool {
        let canceled = self
            .store
            .update(id, |t| t.mark_canceled().map(|()| t.take_callback()));
        match canceled {
            Ok(Ok(callback)) => {
                tracing::info!(task_id = %id, "task canceled before start");
                fire_callback(id, callback, TaskResult::failure(CANCELED_MESSAGE));
                true
            }
            _ => false,
        }
    }

    #[tracing::instrument(skip(self, job), fields(task_id = %job.task_id))]
    async fn process(&self, job: &Job) -> Result<(), DispatchError> {
        let id = job.task_id;
        let claimed = self
            .store
            .update(id, |t| t.claim().then(|| t.snapshot()))?;
        let Some(task) = claimed else {
            tracing::debug!("task no longer runnable, skipping");
            return Ok(());
        };

        let Some(handler) = self.registry.resolve(task.task_type()) else {
            // configuration error: no retry is consumed
            tracing::error!(
                task_type = %task.task_type(),
                "no handler registered at dispatch time"
            );
            let callback = self
                .store
                .update(id, |t| t.mark_failed(NO_HANDLER_MESSAGE).map(|()| t.take_callback()))??;
            fire_callback(id, callback, TaskResult::failure(NO_HANDLER_MESSAGE));
            return Ok(());
        };

        tracing::debug!(
            task_type = %task.task_type(),
            retry_count = task.retry_count(),
            "handler started"
        );
        let outcome = self.invoke(handler, task).await;
        self.complete(job, outcome)
    }

    /// Run the handler on its own task; errors and panics become failures.
    async fn invoke(&self, handler: Arc<dyn TaskHandler>, task: Task) -> TaskResult {
        let joined = self
            .tracker
            .spawn(async move { handler.handle(task).await })
            .await;
        match joined {
            Ok(Ok(value)) => TaskResult::Success(value),
            Ok(Err(err)) => TaskResult::Failure(err.to_string()),
            Err(err) if err.is_panic() => TaskResult::Failure(format!(
                "handler panicked: {}",
                panic_message(err.into_panic().as_ref())
            )),
            Err(err) => TaskResult::Failure(format!("handler aborted: {err}")),
        }
    }

    fn complete(&self, job: &Job, outcome: TaskResult) -> Result<(), DispatchError> {
        let id = job.task_id;
        match outcome {
            TaskResult::Success(value) => {
                let callback = self.store.update(id, |t| {
                    t.mark_succeeded(value.clone()).map(|()| t.take_callback())
                })??;
                tracing::info!(task_id = %id, "task succeeded");
                fire_callback(id, callback, TaskResult::Success(value));
            }
            TaskResult::Failure(error) => {
                let max_retry = self.config.retry.max_retry;
                let (disposition, retry_count, callback) = self.store.update(id, |t| {
                    let disposition = t.record_failure(error.clone(), max_retry)?;
                    let callback = match disposition {
                        FailureDisposition::Exhausted => t.take_callback(),
                        FailureDisposition::Retry => None,
                    };
                    Ok::<_, TransitionError>((disposition, t.retry_count(), callback))
                })??;

                match disposition {
                    FailureDisposition::Retry => {
                        tracing::warn!(
                            task_id = %id,
                            retry_count,
                            max_retry,
                            error = %error,
                            "task failed, retrying"
                        );
                        self.retry(job, retry_count);
                    }
                    FailureDisposition::Exhausted => {
                        tracing::error!(
                            task_id = %id,
                            retry_count,
                            error = %error,
                            "task failed permanently"
                        );
                        fire_callback(id, callback, TaskResult::Failure(error));
                    }
                }
            }
        }
        Ok(())
    }

    fn retry(&self, job: &Job, retry_count: u32) {
        let id = job.task_id;
        let options = job.options;
        let delay = self.config.retry.next_delay(retry_count);
        if delay.is_zero() {
            self.reschedule(id, options);
            return;
        }

        tracing::debug!(task_id = %id, delay_ms = delay.as_millis() as u64, "retry delayed");
        let me = self.me.clone();
        self.tracker.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = me.upgrade() {
                core.reschedule(id, options);
            }
        });
    }

    fn reschedule(&self, id: TaskId, options: ExecOptions) {
        if let Err(err) = self.schedule(id, options) {
            tracing::error!(task_id = %id, error = %err, "failed to reschedule task");
            self.fail_internal(id, &err);
        }
    }

    /// Last resort when our own bookkeeping failed: force Error so the task is
    /// never left in limbo.
    fn fail_internal(&self, id: TaskId, err: &DispatchError) {
        let message = format!("internal error: {err}");
        let failed = self
            .store
            .update(id, |t| t.mark_failed(message.clone()).map(|()| t.take_callback()));
        if let Ok(Ok(callback)) = failed {
            fire_callback(id, callback, TaskResult::Failure(message));
        }
    }
}

#[async_trait]
impl JobRunner for Core {
    async fn run(&self, job: &Job) {
        if let Err(err) = self.process(job).await {
            tracing::error!(
                task_id = %job.task_id,
                error = %err,
                "internal error while processing task"
            );
            self.fail_internal(job.task_id, &err);
        }
    }
}

/// Invoke a callback outside any lock; a panic is logged and swallowed.
fn fire_callback(id: TaskId, callback: Option<TaskCallback>, result: TaskResult) {
    let Some(callback) = callback else {
        return;
    };
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback.call(result))) {
        tracing::error!(
            task_id = %id,
            panic = %panic_message(panic.as_ref()),
            "task callback panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
