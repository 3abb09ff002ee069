use crate::api::AnalysisOutcome;
use crate::monitor::CancelMonitor;
use crate::TaskError;
use tokio::sync::oneshot;

/// Caller-side handle for a posted analysis.
///
/// Posting returns immediately; the handle resolves once the worker loop has
/// executed (or suppressed) the command.
pub struct AnalysisTask {
    monitor: CancelMonitor,
    rx: oneshot::Receiver<Result<AnalysisOutcome, TaskError>>,
}

impl AnalysisTask {
    pub(crate) fn new(
        monitor: CancelMonitor,
        rx: oneshot::Receiver<Result<AnalysisOutcome, TaskError>>,
    ) -> Self {
        Self { monitor, rx }
    }

    /// Request cooperative cancellation of the analysis.
    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    pub fn monitor(&self) -> &CancelMonitor {
        &self.monitor
    }

    /// Block until the analysis completes.
    ///
    /// A command dropped without ever executing (scheduler shutdown) resolves
    /// as [`TaskError::Cancelled`]. Must not be called from an async context.
    pub fn join(self) -> Result<AnalysisOutcome, TaskError> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(TaskError::Cancelled),
        }
    }
}
