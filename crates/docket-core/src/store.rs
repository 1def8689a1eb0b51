//! In-memory task store: the single source of truth for task state.
//!
//! One `std::sync::Mutex` guards the map. It is held for the map access only,
//! never across a handler or callback, so readers never wait on execution.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use crate::domain::{Task, TaskId, TaskStatus};
use crate::error::StoreError;
use crate::observability::{StatusCounts, TaskEvent};

const EVENT_CAPACITY: usize = 1024;

pub struct TaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,

    /// Status changes, in commit order.
    events: broadcast::Sender<TaskEvent>,

    /// Bumped after every commit; completion waiters park on it.
    revision: watch::Sender<u64>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (revision, _) = watch::channel(0);
        Self {
            tasks: Mutex::new(HashMap::new()),
            events,
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    /// Insert or overwrite.
    pub fn put(&self, task: Task) {
        {
            let mut tasks = self.lock();
            // ignore send error: no subscribers
            let _ = self.events.send(TaskEvent::from(&task));
            tasks.insert(task.id(), task);
        }
        self.bump();
    }

    /// Insert only if the id is not stored yet.
    pub fn insert_new(&self, task: Task) -> Result<(), StoreError> {
        {
            let mut tasks = self.lock();
            match tasks.entry(task.id()) {
                Entry::Occupied(_) => return Err(StoreError::AlreadyExists(task.id())),
                Entry::Vacant(slot) => {
                    let _ = self.events.send(TaskEvent::from(&task));
                    slot.insert(task);
                }
            }
        }
        self.bump();
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.lock().get(&id).map(Task::snapshot)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock().get(&id).map(Task::status)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Snapshot of every task. Order is unspecified.
    pub fn list_all(&self) -> Vec<Task> {
        self.lock().values().map(Task::snapshot).collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.lock().values() {
            counts.record(task.status());
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `mutator` to the stored task under the lock.
    ///
    /// When the status changed, `updated_at` is refreshed and a `TaskEvent` is
    /// published. Completion waiters are woken after the lock is released.
    pub fn update<R>(
        &self,
        id: TaskId,
        mutator: impl FnOnce(&mut Task) -> R,
    ) -> Result<R, StoreError> {
        let (out, changed) = {
            let mut tasks = self.lock();
            let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            let before = task.status();
            let out = mutator(task);
            let changed = task.status() != before;
            if changed {
                task.touch();
                let _ = self.events.send(TaskEvent::from(&*task));
            }
            (out, changed)
        };
        if changed {
            self.bump();
        }
        Ok(out)
    }

    /// Receive every status change committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub(crate) fn watch_revisions(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
