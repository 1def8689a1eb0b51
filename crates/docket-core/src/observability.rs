use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskId, TaskStatus};

/// Number of tasks per status at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub waiting: usize,
    pub processing: usize,
    pub success: usize,
    pub error: usize,
    pub canceled: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Waiting => self.waiting += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Success => self.success += 1,
            TaskStatus::Error => self.error += 1,
            TaskStatus::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.waiting + self.processing + self.success + self.error + self.canceled
    }

    /// Tasks that can still change on their own.
    pub fn pending(&self) -> usize {
        self.waiting + self.processing
    }
}

/// Published by the store every time a task's status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub retry_count: u32,
}

impl From<&Task> for TaskEvent {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            status: task.status(),
            retry_count: task.retry_count(),
        }
    }
}
