//! docket-core
//!
//! In-process task dispatcher: submit typed tasks, run them on a bounded worker
//! pool, retry faults, and observe each task through a shared store.
//!
//! # Modules
//! - **domain**: task record, status machine, ids, outcomes
//! - **registry**: task type -> handler mapping
//! - **dispatcher**: scheduling, execution, retries, shutdown
//! - **store**: in-memory task store with status events
//! - **config** / **retry**: dispatcher settings and retry policy
//! - **observability**: status counts and change events

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod observability;
pub mod registry;
pub mod retry;
pub mod store;

mod pool;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{Dispatcher, ExecOptions, SubmitOptions};
pub use domain::{Task, TaskId, TaskResult, TaskStatus, TaskType};
pub use error::{DispatchError, HandlerError, StoreError};
pub use observability::{StatusCounts, TaskEvent};
pub use registry::{HandlerRegistry, TaskHandler, handler_fn};
pub use retry::{Backoff, RetryPolicy};
pub use store::TaskStore;
