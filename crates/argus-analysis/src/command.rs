use crate::api::{AnalysisConfig, AnalysisOutcome, FileSet, ResultSink};
use crate::monitor::CancelMonitor;
use crate::task::AnalysisTask;
use crate::TaskError;
use argus_core::{AnalysisId, ScopeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// What prompted an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Explicit user action. Coalesced like any other trigger: a newer
    /// analysis of the same scope and files supersedes a queued one.
    Forced,
    AutoSave,
    ContentChange,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Forced => "forced",
            TriggerReason::AutoSave => "auto_save",
            TriggerReason::ContentChange => "content_change",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the effective analysis configuration just before execution, so a
/// command queued for a while still runs against current settings.
pub type ConfigSupplier = Arc<dyn Fn() -> AnalysisConfig + Send + Sync>;

/// Evaluated by the queue to decide whether a command may start yet.
pub type Preconditions = Arc<dyn Fn() -> bool + Send + Sync>;

fn next_sequence() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A unit of work executed by the worker loop.
///
/// Closed set of variants, switched exhaustively in the worker loop.
/// Commands are immutable after posting except for their monitor's cancel
/// state.
pub enum Command {
    Analyze(AnalyzeCommand),
    UnregisterScope(UnregisterScopeCommand),
}

impl Command {
    pub fn scope_id(&self) -> &ScopeId {
        match self {
            Command::Analyze(cmd) => &cmd.scope,
            Command::UnregisterScope(cmd) => &cmd.scope,
        }
    }

    /// Global creation-order sequence number; FIFO tie-break within a
    /// priority class.
    pub fn sequence(&self) -> u64 {
        match self {
            Command::Analyze(cmd) => cmd.sequence,
            Command::UnregisterScope(cmd) => cmd.sequence,
        }
    }

    /// Queue priority rank; lower runs first. Structural commands pre-empt
    /// analyses because they may make them irrelevant.
    pub fn priority(&self) -> u8 {
        match self {
            Command::UnregisterScope(_) => 0,
            Command::Analyze(_) => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Analyze(_) => "analyze",
            Command::UnregisterScope(_) => "unregister_scope",
        }
    }

    pub fn monitor(&self) -> &CancelMonitor {
        match self {
            Command::Analyze(cmd) => &cmd.monitor,
            Command::UnregisterScope(cmd) => &cmd.monitor,
        }
    }

    /// Whether the command's preconditions hold and it may start now.
    pub fn is_ready(&self) -> bool {
        match self {
            Command::Analyze(cmd) => (cmd.preconditions)(),
            Command::UnregisterScope(_) => true,
        }
    }

    /// Cancel the command and resolve its result future, if any.
    pub fn cancel(&self) {
        match self {
            Command::Analyze(cmd) => cmd.cancel(),
            Command::UnregisterScope(cmd) => cmd.monitor.cancel(),
        }
    }

    /// Asked by the queue when `new` is posted: should this already-queued
    /// command be cancelled and removed?
    ///
    /// True when this is a superseded duplicate (an analysis of the same
    /// scope and file set as the new analysis) or when it is already
    /// cancelled.
    pub fn should_cancel_post(&self, new: &Command) -> bool {
        if self.monitor().is_cancelled() {
            return true;
        }
        match (self, new) {
            (Command::Analyze(old), Command::Analyze(new)) => {
                old.scope == new.scope && old.files == new.files
            }
            _ => false,
        }
    }

    /// Asked by the queue just before delivery: was this command cancelled
    /// while it waited?
    pub fn should_cancel_queue(&self) -> bool {
        self.monitor().is_cancelled()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind())
            .field("scope", self.scope_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// Run the analysis engine over a scope (or a subset of its files).
pub struct AnalyzeCommand {
    scope: ScopeId,
    analysis_id: AnalysisId,
    sequence: u64,
    trigger: TriggerReason,
    files: FileSet,
    extra_properties: BTreeMap<String, String>,
    config_supplier: ConfigSupplier,
    preconditions: Preconditions,
    sink: Arc<dyn ResultSink>,
    monitor: CancelMonitor,
    result_tx: Mutex<Option<oneshot::Sender<Result<AnalysisOutcome, TaskError>>>>,
}

impl AnalyzeCommand {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scope: ScopeId,
        analysis_id: AnalysisId,
        trigger: TriggerReason,
        files: FileSet,
        extra_properties: BTreeMap<String, String>,
        config_supplier: ConfigSupplier,
        preconditions: Preconditions,
        sink: Arc<dyn ResultSink>,
        monitor: CancelMonitor,
    ) -> (Self, AnalysisTask) {
        let (result_tx, result_rx) = oneshot::channel();
        let command = Self {
            scope,
            analysis_id,
            sequence: next_sequence(),
            trigger,
            files,
            extra_properties,
            config_supplier,
            preconditions,
            sink,
            monitor: monitor.clone(),
            result_tx: Mutex::new(Some(result_tx)),
        };
        (command, AnalysisTask::new(monitor, result_rx))
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope
    }

    pub fn analysis_id(&self) -> AnalysisId {
        self.analysis_id
    }

    pub fn trigger(&self) -> TriggerReason {
        self.trigger
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn extra_properties(&self) -> &BTreeMap<String, String> {
        &self.extra_properties
    }

    pub fn monitor(&self) -> &CancelMonitor {
        &self.monitor
    }

    pub fn sink(&self) -> &dyn ResultSink {
        &*self.sink
    }

    /// Resolve the effective configuration, merging the command's extra
    /// properties over the supplied base configuration.
    pub fn config(&self) -> AnalysisConfig {
        let mut config = (self.config_supplier)();
        for (key, value) in &self.extra_properties {
            config.properties.insert(key.clone(), value.clone());
        }
        config
    }

    /// Cancel the monitor and resolve the caller's future as cancelled. The
    /// result sink is never invoked for a cancelled command.
    pub fn cancel(&self) {
        self.monitor.cancel();
        self.send(Err(TaskError::Cancelled));
    }

    pub(crate) fn complete(&self, outcome: AnalysisOutcome) {
        self.send(Ok(outcome));
    }

    pub(crate) fn fail(&self, err: TaskError) {
        self.send(Err(err));
    }

    fn send(&self, result: Result<AnalysisOutcome, TaskError>) {
        if let Some(tx) = self.result_tx.lock().take() {
            // The caller may have dropped its task handle; that's fine.
            let _ = tx.send(result);
        }
    }
}

/// Tear down all state for a scope the client no longer tracks.
pub struct UnregisterScopeCommand {
    scope: ScopeId,
    sequence: u64,
    monitor: CancelMonitor,
}

impl UnregisterScopeCommand {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            sequence: next_sequence(),
            monitor: CancelMonitor::new(),
        }
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope
    }
}
