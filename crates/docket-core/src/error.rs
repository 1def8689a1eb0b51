use thiserror::Error;

use crate::domain::{TaskId, TaskStatus, TaskType, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already stored: {0}")]
    AlreadyExists(TaskId),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Submission-time check: the task never enters the store.
    #[error("handler not found for task_type={0}")]
    HandlerNotRegistered(TaskType),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The id is already in the store; a task is admitted once.
    #[error("task already submitted: {0}")]
    AlreadySubmitted(TaskId),

    /// Only a fresh (Waiting) task can be submitted.
    #[error("task {task_id} cannot be submitted in status {status}")]
    NotWaiting { task_id: TaskId, status: TaskStatus },

    #[error("dispatcher is shut down")]
    Closed,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => DispatchError::TaskNotFound(id),
            StoreError::AlreadyExists(id) => DispatchError::AlreadySubmitted(id),
        }
    }
}

/// Fault reported by a handler. Drives the retry policy like a panic would.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json: {err}"))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
