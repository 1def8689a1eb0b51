//! Outcome of one handler invocation.
//!
//! The dispatcher turns whatever the handler did (returned a value, returned an
//! error, panicked) into a `TaskResult`, then drives the retry policy from it.

use serde::{Deserialize, Serialize};

/// Tagged union: either a success payload or a failure message, never both.
///
/// Serialized externally tagged, e.g. `{"success": {...}}` / `{"failure": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    Success(serde_json::Value),
    Failure(String),
}

impl TaskResult {
    pub fn success(result: serde_json::Value) -> Self {
        Self::Success(result)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }
}

impl<E: std::fmt::Display> From<Result<serde_json::Value, E>> for TaskResult {
    fn from(r: Result<serde_json::Value, E>) -> Self {
        match r {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}
