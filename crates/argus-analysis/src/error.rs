/// Cooperative cancellation signal.
///
/// Raised by [`crate::CancelMonitor::check_cancelled`] and expected to unwind
/// long-running work up to the worker loop, where it is treated as a normal,
/// silent completion. It is never logged as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Terminal outcome of a posted analysis that did not produce results.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("operation was cancelled")]
    Cancelled,

    #[error("analysis task panicked")]
    Panicked,

    #[error("analysis engine failure: {0}")]
    Engine(anyhow::Error),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled(_) => TaskError::Cancelled,
            EngineError::Internal(err) => TaskError::Engine(err),
        }
    }
}

/// Failure reported by the external analysis engine.
///
/// Engines observe the request's [`crate::CancelMonitor`] and surface
/// cancellation as [`EngineError::Cancelled`] (typically via `?` on
/// `check_cancelled`); anything else is an engine-internal failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Contract violation when posting to the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    /// The scheduler owning the queue has been stopped.
    #[error("command queue is closed")]
    Closed,
}

/// Shutdown signal returned by a blocking `take_next` once the queue closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command queue is closed")]
pub struct QueueClosed;

/// Failure of the remote client channel.
///
/// Progress reporting degrades to a no-op on these; they never fail the
/// underlying analysis work.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client rejected the request: {0}")]
    Rejected(String),

    #[error("client channel unavailable: {0}")]
    Unavailable(String),
}
