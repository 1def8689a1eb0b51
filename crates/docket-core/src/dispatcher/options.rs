/// Per-submission overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Run this task on its own pool of this many workers instead of the
    /// shared pool.
    pub workers: Option<usize>,

    /// Override the dispatcher's `auto_start` for this submission.
    pub execute_now: Option<bool>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn execute_now(mut self, execute_now: bool) -> Self {
        self.execute_now = Some(execute_now);
        self
    }

    /// Record the task but leave it Waiting until `execute` / `start_all`.
    pub fn deferred() -> Self {
        Self::default().execute_now(false)
    }
}

/// Options for (re-)scheduling a known task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub workers: Option<usize>,
}

impl ExecOptions {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: Some(workers),
        }
    }
}

impl From<SubmitOptions> for ExecOptions {
    fn from(options: SubmitOptions) -> Self {
        Self {
            workers: options.workers,
        }
    }
}
