//! The analysis scheduler: single worker loop draining the command queue.
//!
//! All engine work runs on one dedicated thread, so commands execute strictly
//! one at a time in queue order. Posting never blocks on analysis; callers
//! get an [`AnalysisTask`] handle that resolves when their command has run
//! (or was suppressed).

use crate::api::{
    AnalysisConfig, AnalysisEngine, AnalysisOutcome, AnalysisRequest, FileSet, Finding, ResultSink,
};
use crate::command::{
    AnalyzeCommand, Command, ConfigSupplier, Preconditions, TriggerReason, UnregisterScopeCommand,
};
use crate::error::{PostError, QueueClosed, TaskError};
use crate::monitor::{CancelMonitor, MonitorSet};
use crate::optimizer::{SensorContext, SensorDescriptor};
use crate::progress::{ProgressClient, ProgressNotifier, TaskManager};
use crate::queue::{CommandQueue, QueueConfig};
use crate::task::AnalysisTask;
use argus_cache::{CacheConfig, CacheKey, CacheStats, Fingerprint, ResultCache};
use argus_core::{panic_payload_to_str, AnalysisId, FileId, ScopeId, TaskId};
use argus_metrics::MetricsRegistry;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub const WORKER_THREAD_NAME: &str = "argus-analysis-scheduler";

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub queue: QueueConfig,
    pub cache: CacheConfig,
}

/// Everything needed to post one analysis.
///
/// Built with [`AnalyzeParams::new`] plus the chained setters; only the scope
/// and the configuration supplier are mandatory.
pub struct AnalyzeParams {
    scope: ScopeId,
    trigger: TriggerReason,
    files: FileSet,
    extra_properties: BTreeMap<String, String>,
    config_supplier: ConfigSupplier,
    preconditions: Preconditions,
    sink: Arc<dyn ResultSink>,
    monitor: Option<CancelMonitor>,
}

impl AnalyzeParams {
    pub fn new(scope: impl Into<ScopeId>, config_supplier: ConfigSupplier) -> Self {
        Self {
            scope: scope.into(),
            trigger: TriggerReason::Forced,
            files: FileSet::new(),
            extra_properties: BTreeMap::new(),
            config_supplier,
            preconditions: Arc::new(|| true),
            sink: Arc::new(|_finding: Finding| {}),
            monitor: None,
        }
    }

    /// A fixed configuration, for callers without dynamic settings.
    pub fn with_config(scope: impl Into<ScopeId>, config: AnalysisConfig) -> Self {
        Self::new(scope, Arc::new(move || config.clone()))
    }

    pub fn trigger(mut self, trigger: TriggerReason) -> Self {
        self.trigger = trigger;
        self
    }

    /// Restrict the analysis to these files. Empty (the default) analyzes the
    /// whole scope.
    pub fn files(mut self, files: impl IntoIterator<Item = FileId>) -> Self {
        self.files = files.into_iter().collect();
        self
    }

    /// Add a property overriding the supplied configuration for this run only.
    pub fn extra_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_properties.insert(key.into(), value.into());
        self
    }

    /// Defer execution until `preconditions` returns true.
    pub fn preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = preconditions;
        self
    }

    /// Stream findings to `sink` while the analysis runs.
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Drive the command from a caller-owned monitor, typically a child of a
    /// session-wide one. A monitor cancelled before posting means the command
    /// is never executed.
    pub fn monitor(mut self, monitor: CancelMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// What the result cache memoizes for one fingerprint.
struct CachedAnalysis {
    findings: Vec<Finding>,
    failed_files: Vec<FileId>,
}

/// Owns the worker thread, the command queue and the result cache.
///
/// Dropping (or calling [`AnalysisScheduler::stop`]) closes the queue,
/// cancels everything outstanding and joins the worker.
pub struct AnalysisScheduler {
    inner: Arc<SchedulerInner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

struct SchedulerInner {
    engine: Arc<dyn AnalysisEngine>,
    queue: CommandQueue,
    tasks: TaskManager,
    cache: ResultCache<CachedAnalysis>,
    monitors: MonitorSet,
    next_analysis_id: AtomicU64,
}

impl AnalysisScheduler {
    /// Spawn the worker thread and return the scheduler handle.
    pub fn start(
        engine: Arc<dyn AnalysisEngine>,
        client: Option<Arc<dyn ProgressClient>>,
        config: SchedulerConfig,
    ) -> std::io::Result<Self> {
        let inner = Arc::new(SchedulerInner {
            engine,
            queue: CommandQueue::new(config.queue),
            tasks: TaskManager::new(client),
            cache: ResultCache::new(config.cache),
            monitors: MonitorSet::new(),
            next_analysis_id: AtomicU64::new(1),
        });
        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_owned())
                .spawn(move || inner.run())?
        };
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue an analysis. Returns immediately with a handle resolving once
    /// the command has executed, been superseded, or been cancelled.
    pub fn post_analyze(&self, params: AnalyzeParams) -> Result<AnalysisTask, PostError> {
        let monitor = params.monitor.unwrap_or_default();
        self.inner.monitors.register(&monitor);
        let analysis_id = AnalysisId(self.inner.next_analysis_id.fetch_add(1, Ordering::Relaxed));
        let (command, task) = AnalyzeCommand::new(
            params.scope,
            analysis_id,
            params.trigger,
            params.files,
            params.extra_properties,
            params.config_supplier,
            params.preconditions,
            params.sink,
            monitor,
        );
        self.inner.queue.post(Command::Analyze(command))?;
        Ok(task)
    }

    /// Queue a scope teardown. It outranks all pending analyses and, when
    /// taken, purges queued analyses for the same scope.
    pub fn post_unregister_scope(&self, scope: impl Into<ScopeId>) -> Result<(), PostError> {
        self.inner
            .queue
            .post(Command::UnregisterScope(UnregisterScopeCommand::new(
                scope.into(),
            )))
    }

    /// Cancel a running client-visible task by id.
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        self.inner.tasks.cancel_task(task_id)
    }

    /// Wake the worker so it re-evaluates deferred commands' preconditions.
    pub fn poke(&self) {
        self.inner.queue.wake_up();
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.depth()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Close the queue, cancel all outstanding work and join the worker.
    /// Idempotent.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        tracing::info!(
            target = "argus.scheduler",
            pending = self.inner.queue.depth(),
            cache = ?self.inner.cache.stats(),
            "stopping analysis scheduler"
        );
        self.inner.queue.close();
        self.inner.monitors.cancel_all();
        if worker.join().is_err() {
            tracing::error!(
                target = "argus.scheduler",
                "analysis worker thread panicked during shutdown"
            );
        }
    }
}

impl Drop for AnalysisScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerInner {
    fn run(self: Arc<Self>) {
        tracing::debug!(target = "argus.scheduler", "analysis worker started");
        loop {
            match self.queue.take_next() {
                Ok(Command::Analyze(command)) => self.execute_analyze(command),
                Ok(Command::UnregisterScope(command)) => self.execute_unregister(command),
                Err(QueueClosed) => break,
            }
        }
        tracing::debug!(target = "argus.scheduler", "analysis worker stopped");
    }

    fn execute_analyze(&self, command: AnalyzeCommand) {
        let metrics = MetricsRegistry::global();
        let monitor = command.monitor().clone();
        if monitor.is_cancelled() {
            metrics.record_cancelled(command_kind::ANALYZE);
            command.cancel();
            return;
        }

        let started = Instant::now();
        let title = format!("Analyzing {}", command.scope_id());
        let result = self.tasks.run_with_progress(
            Some(command.scope_id()),
            &title,
            true,
            true,
            &monitor,
            |notifier| self.analyze_with_cache(&command, notifier, started),
        );

        match result {
            Ok(outcome) => {
                metrics.record_command(command_kind::ANALYZE, started.elapsed());
                tracing::info!(
                    target = "argus.scheduler",
                    scope = %command.scope_id(),
                    analysis_id = %command.analysis_id(),
                    trigger = %command.trigger(),
                    findings = outcome.findings.len(),
                    failed_files = outcome.failed_files.len(),
                    duration = ?outcome.duration,
                    "analysis completed"
                );
                command.complete(outcome);
            }
            Err(err) if err.is_cancelled() => {
                metrics.record_cancelled(command_kind::ANALYZE);
                tracing::debug!(
                    target = "argus.scheduler",
                    scope = %command.scope_id(),
                    analysis_id = %command.analysis_id(),
                    "analysis cancelled"
                );
                command.cancel();
            }
            Err(err) => {
                metrics.record_error(command_kind::ANALYZE);
                tracing::error!(
                    target = "argus.scheduler",
                    scope = %command.scope_id(),
                    analysis_id = %command.analysis_id(),
                    error = %err,
                    "analysis failed"
                );
                command.fail(err);
            }
        }
    }

    fn analyze_with_cache(
        &self,
        command: &AnalyzeCommand,
        notifier: &dyn ProgressNotifier,
        started: Instant,
    ) -> Result<AnalysisOutcome, TaskError> {
        command.monitor().check_cancelled()?;
        notifier.message("Resolving analysis inputs");

        let config = command.config();
        let context = SensorContext::for_request(command.files(), &config);
        let sensors = context.prune(self.engine.sensors(command.scope_id()));

        let Some(fingerprint) = self.request_fingerprint(command, &config) else {
            // No stable identity for the inputs; run once, memoize nothing.
            let computed = self.run_engine(command, &config, &sensors, notifier)?;
            return Ok(AnalysisOutcome {
                findings: computed.findings,
                failed_files: computed.failed_files,
                duration: started.elapsed(),
            });
        };

        let key = CacheKey {
            fingerprint,
            scope: command.scope_id().clone(),
            files: command.files().clone(),
        };
        let computed = Cell::new(false);
        let cached = self.cache.get_or_compute(&key, || {
            computed.set(true);
            self.run_engine(command, &config, &sensors, notifier)
        })?;

        if computed.get() {
            // The fresh entry reflects current contents; anything older that
            // overlaps the analyzed files is now stale.
            self.cache
                .invalidate_files_keeping(command.files(), Some(&key.fingerprint));
        } else {
            tracing::debug!(
                target = "argus.scheduler",
                scope = %command.scope_id(),
                analysis_id = %command.analysis_id(),
                findings = cached.findings.len(),
                "serving analysis from result cache"
            );
            for finding in &cached.findings {
                command.sink().accept(finding.clone());
            }
        }

        Ok(AnalysisOutcome {
            findings: cached.findings.clone(),
            failed_files: cached.failed_files.clone(),
            duration: started.elapsed(),
        })
    }

    /// Fingerprint of all analysis inputs: file contents, target file set and
    /// effective configuration. `None` makes the run bypass the cache.
    fn request_fingerprint(
        &self,
        command: &AnalyzeCommand,
        config: &AnalysisConfig,
    ) -> Option<Fingerprint> {
        let contents = match self
            .engine
            .input_fingerprint(command.scope_id(), command.files())
        {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                tracing::debug!(
                    target = "argus.scheduler",
                    scope = %command.scope_id(),
                    error = %err,
                    "input fingerprint unavailable, bypassing result cache"
                );
                return None;
            }
        };
        let config_bytes = match serde_json::to_vec(config) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(
                    target = "argus.scheduler",
                    scope = %command.scope_id(),
                    error = %err,
                    "configuration not serializable, bypassing result cache"
                );
                return None;
            }
        };
        let mut builder = Fingerprint::builder()
            .push(command.scope_id().as_str())
            .push(contents.as_str())
            .push(&config_bytes);
        for file in command.files() {
            builder = builder.push(file.as_str());
        }
        Some(builder.finish())
    }

    fn run_engine(
        &self,
        command: &AnalyzeCommand,
        config: &AnalysisConfig,
        sensors: &[SensorDescriptor],
        notifier: &dyn ProgressNotifier,
    ) -> Result<CachedAnalysis, TaskError> {
        command.monitor().check_cancelled()?;
        notifier.message("Running analysis");

        let collector = CollectingSink {
            downstream: command.sink(),
            findings: Mutex::new(Vec::new()),
        };
        let request = AnalysisRequest {
            scope: command.scope_id(),
            files: command.files(),
            config,
            sensors,
            sink: &collector,
            monitor: command.monitor(),
        };
        let outcome = self.engine.run_analysis(request).map_err(TaskError::from)?;
        Ok(CachedAnalysis {
            findings: collector.findings.into_inner(),
            failed_files: outcome.failed_files,
        })
    }

    fn execute_unregister(&self, command: UnregisterScopeCommand) {
        let metrics = MetricsRegistry::global();
        let started = Instant::now();
        let scope = command.scope_id().clone();

        let engine = &self.engine;
        let result = catch_unwind(AssertUnwindSafe(|| engine.unregister_scope(&scope)));
        let dropped = self.cache.invalidate_scope(&scope);

        match result {
            Ok(()) => {
                metrics.record_command(command_kind::UNREGISTER_SCOPE, started.elapsed());
                tracing::info!(
                    target = "argus.scheduler",
                    scope = %scope,
                    cache_entries_dropped = dropped,
                    "scope unregistered"
                );
            }
            Err(payload) => {
                metrics.record_error(command_kind::UNREGISTER_SCOPE);
                tracing::error!(
                    target = "argus.scheduler",
                    scope = %scope,
                    panic = panic_payload_to_str(&*payload),
                    "engine panicked while unregistering scope"
                );
            }
        }
    }
}

mod command_kind {
    pub const ANALYZE: &str = "analyze";
    pub const UNREGISTER_SCOPE: &str = "unregister_scope";
}

/// Records findings for memoization while forwarding them to the caller's
/// sink, preserving streaming delivery on cache misses.
struct CollectingSink<'a> {
    downstream: &'a dyn ResultSink,
    findings: Mutex<Vec<Finding>>,
}

impl ResultSink for CollectingSink<'_> {
    fn accept(&self, finding: Finding) {
        self.findings.lock().push(finding.clone());
        self.downstream.accept(finding);
    }
}
