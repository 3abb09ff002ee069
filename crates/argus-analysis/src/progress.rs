//! Progress reporting towards the embedding client.
//!
//! The client (an IDE frontend) may or may not support progress UI, and its
//! channel can fail at any time. Progress is strictly best-effort: every
//! failure degrades to a no-op notifier and the underlying work continues
//! unaffected.

use crate::error::{ClientError, TaskError};
use crate::monitor::CancelMonitor;
use argus_core::{panic_payload_to_str, ScopeId, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Request to open a progress indicator on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProgressParams {
    pub task_id: TaskId,
    /// The scope the task works on, when it is scope-bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<ScopeId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// True when no meaningful percentage will be reported.
    pub indeterminate: bool,
    pub cancellable: bool,
}

/// Incremental update for a started progress indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
}

/// Client-side progress channel.
///
/// `start_progress` must not return until the client has acknowledged (or
/// rejected) the indicator; implementations own their transport timeouts.
pub trait ProgressClient: Send + Sync {
    fn start_progress(&self, params: StartProgressParams) -> Result<(), ClientError>;
    fn report_progress(&self, update: ProgressUpdate) -> Result<(), ClientError>;
    fn end_progress(&self, task_id: TaskId) -> Result<(), ClientError>;
}

/// What running work uses to report progress, without knowing whether a
/// client indicator is actually attached.
pub trait ProgressNotifier: Send + Sync {
    fn notify(&self, message: Option<&str>, percentage: Option<u8>);

    fn message(&self, message: &str) {
        self.notify(Some(message), None);
    }

    fn percentage(&self, percentage: u8) {
        self.notify(None, Some(percentage));
    }
}

/// Fallback notifier when no client indicator could be started.
pub struct NoopNotifier;

impl ProgressNotifier for NoopNotifier {
    fn notify(&self, _message: Option<&str>, _percentage: Option<u8>) {}
}

struct ClientNotifier {
    client: Arc<dyn ProgressClient>,
    task_id: TaskId,
}

impl ProgressNotifier for ClientNotifier {
    fn notify(&self, message: Option<&str>, percentage: Option<u8>) {
        let update = ProgressUpdate {
            task_id: self.task_id,
            message: message.map(str::to_owned),
            percentage,
        };
        if let Err(err) = self.client.report_progress(update) {
            tracing::debug!(
                target = "argus.progress",
                task_id = self.task_id.0,
                error = %err,
                "dropping progress update"
            );
        }
    }
}

/// Ends the client indicator exactly once, including on panic.
struct ProgressEndGuard {
    client: Arc<dyn ProgressClient>,
    task_id: TaskId,
}

impl Drop for ProgressEndGuard {
    fn drop(&mut self) {
        if let Err(err) = self.client.end_progress(self.task_id) {
            tracing::debug!(
                target = "argus.progress",
                task_id = self.task_id.0,
                error = %err,
                "failed to end progress indicator"
            );
        }
    }
}

/// Tracks client-visible tasks and wraps their execution with progress
/// reporting and panic isolation.
pub struct TaskManager {
    client: Option<Arc<dyn ProgressClient>>,
    next_task_id: AtomicU64,
    active: Mutex<HashMap<TaskId, CancelMonitor>>,
}

impl TaskManager {
    pub fn new(client: Option<Arc<dyn ProgressClient>>) -> Self {
        Self {
            client,
            next_task_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Run `job` as a client-visible task.
    ///
    /// Tries to open a progress indicator first; if the client refuses or
    /// there is no client, the job still runs with a no-op notifier. The
    /// indicator, when opened, is ended exactly once, whether the job
    /// returns, errors, or panics. A panic is contained and surfaced as
    /// [`TaskError::Panicked`].
    pub fn run_with_progress<T>(
        &self,
        scope_id: Option<&ScopeId>,
        title: &str,
        indeterminate: bool,
        cancellable: bool,
        monitor: &CancelMonitor,
        job: impl FnOnce(&dyn ProgressNotifier) -> Result<T, TaskError>,
    ) -> Result<T, TaskError> {
        let task_id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        self.active.lock().insert(task_id, monitor.clone());
        let _active_guard = ActiveTaskGuard {
            manager: self,
            task_id,
        };

        let mut end_guard = None;
        let notifier: Box<dyn ProgressNotifier> = match &self.client {
            Some(client) => {
                let params = StartProgressParams {
                    task_id,
                    scope_id: scope_id.cloned(),
                    title: title.to_owned(),
                    message: None,
                    indeterminate,
                    cancellable,
                };
                match client.start_progress(params) {
                    Ok(()) => {
                        end_guard = Some(ProgressEndGuard {
                            client: client.clone(),
                            task_id,
                        });
                        Box::new(ClientNotifier {
                            client: client.clone(),
                            task_id,
                        })
                    }
                    Err(err) => {
                        tracing::debug!(
                            target = "argus.progress",
                            task_id = task_id.0,
                            title,
                            error = %err,
                            "client refused progress indicator, running without"
                        );
                        Box::new(NoopNotifier)
                    }
                }
            }
            None => Box::new(NoopNotifier),
        };

        let result = catch_unwind(AssertUnwindSafe(|| job(&*notifier)));
        drop(end_guard);

        match result {
            Ok(result) => result,
            Err(payload) => {
                tracing::error!(
                    target = "argus.progress",
                    task_id = task_id.0,
                    title,
                    panic = panic_payload_to_str(&*payload),
                    "task panicked"
                );
                Err(TaskError::Panicked)
            }
        }
    }

    /// Cancel a running task by its client-visible id. Returns false when the
    /// task is unknown or already finished.
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        let monitor = self.active.lock().get(&task_id).cloned();
        match monitor {
            Some(monitor) => {
                tracing::debug!(
                    target = "argus.progress",
                    task_id = task_id.0,
                    "cancelling task on client request"
                );
                monitor.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

struct ActiveTaskGuard<'a> {
    manager: &'a TaskManager,
    task_id: TaskId,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        self.manager.active.lock().remove(&self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingClient {
        starts: Mutex<Vec<StartProgressParams>>,
        ends: AtomicUsize,
        updates: Mutex<Vec<ProgressUpdate>>,
        refuse_start: bool,
    }

    impl ProgressClient for RecordingClient {
        fn start_progress(&self, params: StartProgressParams) -> Result<(), ClientError> {
            if self.refuse_start {
                return Err(ClientError::Rejected("no progress UI".into()));
            }
            self.starts.lock().push(params);
            Ok(())
        }

        fn report_progress(&self, update: ProgressUpdate) -> Result<(), ClientError> {
            self.updates.lock().push(update);
            Ok(())
        }

        fn end_progress(&self, _task_id: TaskId) -> Result<(), ClientError> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn reports_progress_through_the_client() {
        let client = Arc::new(RecordingClient::default());
        let manager = TaskManager::new(Some(client.clone()));

        let result = manager.run_with_progress(
            None,
            "Analyzing",
            true,
            true,
            &CancelMonitor::new(),
            |p| {
                p.message("indexing");
                p.percentage(50);
                Ok::<_, TaskError>(42)
            },
        );

        assert_eq!(result.unwrap(), 42);
        assert_eq!(client.starts.lock().len(), 1);
        assert_eq!(client.ends.load(Ordering::SeqCst), 1);
        let updates = client.updates.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_deref(), Some("indexing"));
        assert_eq!(updates[1].percentage, Some(50));
    }

    #[test]
    fn start_request_carries_scope_and_indeterminate() {
        let client = Arc::new(RecordingClient::default());
        let manager = TaskManager::new(Some(client.clone()));
        let scope = ScopeId::new("project-a");

        manager
            .run_with_progress(
                Some(&scope),
                "Analyzing project-a",
                false,
                true,
                &CancelMonitor::new(),
                |_p| Ok::<_, TaskError>(()),
            )
            .unwrap();

        let starts = client.starts.lock();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].scope_id.as_ref(), Some(&scope));
        assert_eq!(starts[0].title, "Analyzing project-a");
        assert!(!starts[0].indeterminate);
        assert!(starts[0].cancellable);
    }

    #[test]
    fn runs_without_client_or_when_start_is_refused() {
        let manager = TaskManager::new(None);
        let result = manager.run_with_progress(
            None,
            "Analyzing",
            true,
            false,
            &CancelMonitor::new(),
            |p| {
                p.message("ignored");
                Ok::<_, TaskError>(())
            },
        );
        assert!(result.is_ok());

        let client = Arc::new(RecordingClient {
            refuse_start: true,
            ..RecordingClient::default()
        });
        let manager = TaskManager::new(Some(client.clone()));
        let result = manager.run_with_progress(
            None,
            "Analyzing",
            true,
            false,
            &CancelMonitor::new(),
            |p| {
                p.message("also ignored");
                Ok::<_, TaskError>(())
            },
        );
        assert!(result.is_ok());
        // No indicator was started, so none must be ended.
        assert_eq!(client.ends.load(Ordering::SeqCst), 0);
        assert!(client.updates.lock().is_empty());
    }

    #[test]
    fn a_panicking_job_still_ends_the_indicator() {
        let client = Arc::new(RecordingClient::default());
        let manager = TaskManager::new(Some(client.clone()));

        let result = manager.run_with_progress(
            None,
            "Analyzing",
            true,
            true,
            &CancelMonitor::new(),
            |_p| -> Result<(), TaskError> { panic!("sensor exploded") },
        );

        assert!(matches!(result, Err(TaskError::Panicked)));
        assert_eq!(client.ends.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn cancel_task_reaches_the_running_monitor() {
        let manager = Arc::new(TaskManager::new(None));
        let monitor = CancelMonitor::new();

        let inner = monitor.clone();
        let manager2 = manager.clone();
        let handle = std::thread::spawn(move || {
            manager2.run_with_progress(None, "Analyzing", true, true, &inner.clone(), move |_p| {
                while !inner.is_cancelled() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err::<(), _>(TaskError::Cancelled)
            })
        });

        // Wait for the task to register, then cancel it by id.
        let task_id = TaskId(1);
        while manager.active_count() == 0 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(manager.cancel_task(task_id));
        assert!(matches!(handle.join().unwrap(), Err(TaskError::Cancelled)));
        assert!(!manager.cancel_task(task_id));
    }
}
