//! Task record: immutable identity + mutable lifecycle state.
//!
//! State transitions:
//! - Waiting -> Processing -> Success
//! - Waiting -> Processing -> Waiting (failure, retries remain)
//! - Waiting -> Processing -> Error (failure, retries exhausted / no handler)
//! - Waiting -> Processing -> Canceled (canceled before a worker claimed it)
//!
//! Success / Error / Canceled are terminal. Every transition goes through a
//! method here, so an illegal one is a `TransitionError` instead of a silently
//! corrupted record.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::outcome::TaskResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Admitted, not scheduled (or sent back for a retry).
    Waiting,

    /// Scheduled onto a pool; the handler may or may not have started yet.
    Processing,

    Success,

    /// Failed permanently.
    Error,

    /// Canceled before a worker started it.
    Canceled,
}

impl TaskStatus {
    /// Is this a terminal state (no further automatic transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Processing => "processing",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition for {task_id}: {from} -> {to}")]
pub struct TransitionError {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to Waiting; the caller must reschedule it.
    Retry,

    /// Retries exhausted; the task is now Error.
    Exhausted,
}

/// Completion hook attached to a task.
///
/// The dispatcher invokes it exactly once, with the final `TaskResult`, after
/// the terminal status is committed and outside the store lock.
#[derive(Clone)]
pub struct TaskCallback(Arc<dyn Fn(TaskResult) + Send + Sync>);

impl TaskCallback {
    pub fn new(f: impl Fn(TaskResult) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, result: TaskResult) {
        (self.0)(result)
    }
}

impl fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskCallback(..)")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    #[serde(rename = "type")]
    task_type: TaskType,
    name: String,
    payload: serde_json::Value,
    status: TaskStatus,
    retry_count: u32,
    error_message: Option<String>,
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// A worker has started the current attempt.
    #[serde(skip)]
    claimed: bool,

    #[serde(skip)]
    callback: Option<TaskCallback>,
}

impl Task {
    pub fn new(
        task_type: impl Into<TaskType>,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            name: name.into(),
            payload,
            status: TaskStatus::Waiting,
            retry_count: 0,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
            claimed: false,
            callback: None,
        }
    }

    pub fn with_callback(mut self, f: impl Fn(TaskResult) + Send + Sync + 'static) -> Self {
        self.callback = Some(TaskCallback::new(f));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Copy for external readers. The callback stays with the stored record.
    pub fn snapshot(&self) -> Task {
        Task {
            callback: None,
            ..self.clone()
        }
    }

    fn transition_error(&self, to: TaskStatus) -> TransitionError {
        TransitionError {
            task_id: self.id,
            from: self.status,
            to,
        }
    }

    /// Waiting -> Processing. Called when the task is handed to a pool.
    pub fn mark_processing(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Waiting {
            return Err(self.transition_error(TaskStatus::Processing));
        }
        self.status = TaskStatus::Processing;
        self.claimed = false;
        Ok(())
    }

    /// A worker takes ownership of the current attempt.
    /// Returns false if the task is no longer runnable (e.g. canceled while queued).
    pub fn claim(&mut self) -> bool {
        if self.status != TaskStatus::Processing || self.claimed {
            return false;
        }
        self.claimed = true;
        true
    }

    /// Processing -> Success.
    pub fn mark_succeeded(&mut self, result: serde_json::Value) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Processing {
            return Err(self.transition_error(TaskStatus::Success));
        }
        self.status = TaskStatus::Success;
        self.result = Some(result);
        Ok(())
    }

    /// Processing -> Waiting | Error, consuming one retry.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        max_retry: u32,
    ) -> Result<FailureDisposition, TransitionError> {
        if self.status != TaskStatus::Processing {
            return Err(self.transition_error(TaskStatus::Error));
        }
        self.retry_count += 1;
        self.error_message = Some(error.into());
        if self.retry_count < max_retry {
            self.status = TaskStatus::Waiting;
            Ok(FailureDisposition::Retry)
        } else {
            self.status = TaskStatus::Error;
            Ok(FailureDisposition::Exhausted)
        }
    }

    /// Any non-terminal status -> Error, without consuming a retry.
    ///
    /// Used for configuration errors (no handler) and internal faults.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(TaskStatus::Error));
        }
        self.status = TaskStatus::Error;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Processing (queued, unclaimed) -> Canceled.
    pub fn mark_canceled(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Processing || self.claimed {
            return Err(self.transition_error(TaskStatus::Canceled));
        }
        self.status = TaskStatus::Canceled;
        Ok(())
    }

    pub(crate) fn take_callback(&mut self) -> Option<TaskCallback> {
        self.callback.take()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn processing_task() -> Task {
        let mut task = Task::new("echo", "hello.txt", json!({"text": "hi"}));
        task.mark_processing().unwrap();
        task
    }

    #[test]
    fn new_task_starts_waiting() {
        let task = Task::new("echo", "hello.txt", json!({}));
        assert_eq!(task.status(), TaskStatus::Waiting);
        assert_eq!(task.retry_count(), 0);
        assert!(task.error_message().is_none());
        assert!(task.result().is_none());
        assert_eq!(task.created_at(), task.updated_at());
    }

    #[rstest]
    #[case::waiting(TaskStatus::Waiting, false)]
    #[case::processing(TaskStatus::Processing, false)]
    #[case::success(TaskStatus::Success, true)]
    #[case::error(TaskStatus::Error, true)]
    #[case::canceled(TaskStatus::Canceled, true)]
    fn terminal_statuses(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn success_sets_result() {
        let mut task = processing_task();
        task.mark_succeeded(json!({"text": "hi"})).unwrap();
        assert_eq!(task.status(), TaskStatus::Success);
        assert_eq!(task.result(), Some(&json!({"text": "hi"})));

        // no way back from a terminal state
        let err = task.mark_processing().unwrap_err();
        assert_eq!(err.from, TaskStatus::Success);
        assert_eq!(err.to, TaskStatus::Processing);
    }

    #[test]
    fn failures_retry_until_exhausted() {
        let mut task = processing_task();

        assert_eq!(task.record_failure("e1", 3).unwrap(), FailureDisposition::Retry);
        assert_eq!(task.status(), TaskStatus::Waiting);
        assert_eq!(task.retry_count(), 1);

        task.mark_processing().unwrap();
        assert_eq!(task.record_failure("e2", 3).unwrap(), FailureDisposition::Retry);
        assert_eq!(task.retry_count(), 2);

        task.mark_processing().unwrap();
        assert_eq!(
            task.record_failure("e3", 3).unwrap(),
            FailureDisposition::Exhausted
        );
        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(task.retry_count(), 3);
        assert_eq!(task.error_message(), Some("e3"));
        assert!(task.mark_processing().is_err());
    }

    #[test]
    fn record_failure_requires_processing() {
        let mut task = Task::new("echo", "x", json!({}));
        assert!(task.record_failure("nope", 3).is_err());
        assert_eq!(task.retry_count(), 0);
    }

    #[test]
    fn mark_failed_does_not_consume_retry() {
        let mut task = processing_task();
        task.mark_failed("no handler registered").unwrap();
        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(task.retry_count(), 0);
        assert!(task.mark_failed("again").is_err());
    }

    #[test]
    fn cancel_only_before_claim() {
        let mut task = processing_task();
        assert!(task.claim());
        assert!(!task.claim(), "second claim must be refused");
        assert!(task.mark_canceled().is_err());

        let mut queued = processing_task();
        queued.mark_canceled().unwrap();
        assert_eq!(queued.status(), TaskStatus::Canceled);
        assert!(!queued.claim());
    }

    #[test]
    fn snapshot_drops_callback() {
        let task = Task::new("echo", "x", json!({})).with_callback(|_| {});
        assert!(task.has_callback());
        assert!(!task.snapshot().has_callback());
    }

    #[test]
    fn serializes_public_fields() {
        let task = Task::new("file", "report.pdf", json!({"source_type": "file"}));
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["type"], "file");
        assert_eq!(v["name"], "report.pdf");
        assert_eq!(v["status"], "waiting");
        assert_eq!(v["retry_count"], 0);
        assert!(v.get("claimed").is_none());
        assert!(v.get("callback").is_none());
    }
}
