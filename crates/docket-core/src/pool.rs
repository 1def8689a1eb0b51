//! Bounded worker pool.
//!
//! `size` workers drain a FIFO job queue. A worker takes one job at a time, so
//! the pool never runs more than `size` jobs concurrently; anything submitted
//! while every worker is busy waits in the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio_util::task::TaskTracker;

use crate::dispatcher::ExecOptions;
use crate::domain::TaskId;

/// One scheduled execution of a task.
pub(crate) struct Job {
    pub task_id: TaskId,
    pub options: ExecOptions,

    /// Set for task-scoped pools: closes the pool once this job is done.
    pub release: Option<PoolRelease>,
}

/// Executes jobs handed out by a pool.
#[async_trait]
pub(crate) trait JobRunner: Send + Sync + 'static {
    /// Must not fail: every fault is dealt with inside.
    async fn run(&self, job: &Job);
}

/// Handle that shuts a pool down without owning it.
#[derive(Clone)]
pub(crate) struct PoolRelease(Arc<watch::Sender<bool>>);

impl PoolRelease {
    pub fn release(&self) {
        self.0.send_replace(true);
    }
}

struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

impl JobQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a job is available.
    async fn next(&self) -> Job {
        loop {
            let next = self.lock().jobs.pop_front();
            if let Some(job) = next {
                return job;
            }
            self.notify.notified().await;
        }
    }
}

pub(crate) struct WorkerPool {
    name: String,
    size: usize,
    queue: Arc<JobQueue>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) on `tracker`.
    ///
    /// Workers hold the runner weakly; once it is gone they stop.
    pub fn spawn(
        name: impl Into<String>,
        size: usize,
        tracker: &TaskTracker,
        runner: Weak<dyn JobRunner>,
    ) -> Self {
        let name = name.into();
        let size = size.max(1);
        let queue = Arc::new(JobQueue {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for worker_id in 0..size {
            tracker.spawn(worker_loop(
                name.clone(),
                worker_id,
                Arc::clone(&queue),
                runner.clone(),
                shutdown_rx.clone(),
            ));
        }
        tracing::debug!(pool = %name, size, "worker pool started");

        Self {
            name,
            size,
            queue,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. Hands it back if the pool is closed.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        {
            let mut state = self.queue.lock();
            if state.closed {
                return Err(job);
            }
            state.jobs.push_back(job);
        }
        // notify outside the lock
        self.queue.notify.notify_one();
        Ok(())
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.queue.lock().jobs.len()
    }

    pub fn release_handle(&self) -> PoolRelease {
        PoolRelease(Arc::clone(&self.shutdown_tx))
    }

    /// Stop taking jobs and signal the workers. Jobs a worker is already
    /// running are unaffected; jobs still queued are returned to the caller.
    pub fn close(&self) -> Vec<Job> {
        let drained: Vec<Job> = {
            let mut state = self.queue.lock();
            state.closed = true;
            state.jobs.drain(..).collect()
        };
        self.shutdown_tx.send_replace(true);
        tracing::debug!(pool = %self.name, dropped = drained.len(), "worker pool closed");
        drained
    }
}

async fn worker_loop(
    pool: String,
    worker_id: usize,
    queue: Arc<JobQueue>,
    runner: Weak<dyn JobRunner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // the pop happens in the same poll that completes `next`, so losing
        // the race to shutdown never drops a job
        let job = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped: pool is gone
                    break;
                }
                continue;
            }
            job = queue.next() => job,
        };

        let Some(runner) = runner.upgrade() else {
            tracing::warn!(
                pool = %pool,
                worker_id,
                task_id = %job.task_id,
                "runner dropped, abandoning job"
            );
            break;
        };
        runner.run(&job).await;
        drop(runner);

        if let Some(release) = &job.release {
            release.release();
        }
    }
    tracing::trace!(pool = %pool, worker_id, "worker stopped");
}
