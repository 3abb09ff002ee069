//! Orchestration core of the Argus analysis backend.
//!
//! Argus sits between an IDE frontend and a pluggable analysis engine. This
//! crate owns the machinery in between: a priority command queue with
//! coalescing, a single-threaded worker loop, cascading cooperative
//! cancellation, best-effort progress reporting towards the client, and
//! fingerprint-keyed memoization of analysis outcomes.
//!
//! The entry point is [`AnalysisScheduler`]: give it an [`AnalysisEngine`]
//! and optionally a [`ProgressClient`], then post commands.

mod api;
mod command;
mod error;
mod monitor;
mod optimizer;
mod progress;
mod queue;
mod scheduler;
mod task;

pub use api::{
    language_for_file, ActiveRule, AnalysisConfig, AnalysisEngine, AnalysisOutcome,
    AnalysisRequest, FileSet, Finding, ResultSink,
};
pub use command::{
    AnalyzeCommand, Command, ConfigSupplier, Preconditions, TriggerReason, UnregisterScopeCommand,
};
pub use error::{Cancelled, ClientError, EngineError, PostError, QueueClosed, TaskError};
pub use monitor::{CancelMonitor, MonitorSet};
pub use optimizer::{SensorContext, SensorDescriptor};
pub use progress::{
    NoopNotifier, ProgressClient, ProgressNotifier, ProgressUpdate, StartProgressParams,
    TaskManager,
};
pub use queue::{CommandQueue, QueueConfig};
pub use scheduler::{AnalysisScheduler, AnalyzeParams, SchedulerConfig, WORKER_THREAD_NAME};
pub use task::AnalysisTask;
