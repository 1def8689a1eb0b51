//! Domain model (ids, task record, outcome).

pub mod ids;
pub mod outcome;
pub mod task;

pub use ids::{ParseTaskIdError, TaskId};
pub use outcome::TaskResult;
pub use task::{FailureDisposition, Task, TaskCallback, TaskStatus, TaskType, TransitionError};
