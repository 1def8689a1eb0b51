use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::{Task, TaskType};
use crate::error::HandlerError;

/// A handler for a specific task type.
///
/// Takes an owned snapshot of the task so the handler can decode `payload` as it
/// likes without touching the stored record. `Err` and panics are both treated
/// as faults by the dispatcher.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<serde_json::Value, HandlerError>;
}

/// Adapter so plain async closures can be registered.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, task: Task) -> Result<serde_json::Value, HandlerError> {
        (self.0)(task).await
    }
}

/// Wrap an async closure as a `TaskHandler`.
///
/// ```ignore
/// registry.register("echo", handler_fn(|task| async move { Ok(task.payload().clone()) }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Registry of handlers (task_type -> handler).
///
/// Normally filled during initialization, but kept behind a `RwLock` so a
/// composition root holding a shared dispatcher can still (un)register.
/// Lookups clone the `Arc` and drop the lock before any handler runs.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type. Last registration wins.
    pub fn register(&self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        tracing::debug!(task_type = %task_type, "registering handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type, handler);
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&self, task_type: &TaskType) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_type)
            .is_some()
    }

    pub fn resolve(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
