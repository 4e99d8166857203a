use thiserror::Error;

/// Error taxonomy for the core loop.
///
/// Recovery is local per component: validation failures reject the input with
/// no state change, persistence failures degrade and retry on the next tick,
/// handler failures are isolated to the failing subscriber, and scheduler
/// failures are surfaced as health signals while the scheduler keeps running.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed event or entry: rejected, no state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// I/O failure during flush/load. In-memory state is never corrupted.
    #[error("persistence failure on {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A subscriber's handler failed; other subscribers were unaffected.
    #[error("handler for '{kind}' failed: {message}")]
    Handler { kind: String, message: String },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("heartbeat already running")]
    AlreadyRunning,

    /// A maintenance callback exceeded its time budget and was abandoned.
    #[error("maintenance callback '{name}' timed out after {budget_ms}ms")]
    CallbackTimeout { name: String, budget_ms: u64 },
}

impl CoreError {
    pub fn persistence(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
