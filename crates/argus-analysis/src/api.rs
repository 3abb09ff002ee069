//! Boundary types and traits for the external analysis engine.
//!
//! The engine that actually runs rules against source files lives outside
//! this crate (it is plugin-loaded in production). Argus drives it through
//! [`AnalysisEngine`] and receives findings through [`ResultSink`]; nothing
//! here prescribes how the engine does its work.

use crate::monitor::CancelMonitor;
use crate::optimizer::SensorDescriptor;
use crate::EngineError;
use argus_cache::Fingerprint;
use argus_core::{FileId, ScopeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Target files of an analysis. Empty means "all files in scope".
pub type FileSet = BTreeSet<FileId>;

/// A rule enabled for a scope, with its effective parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRule {
    /// Rule key in `repository:rule` form, e.g. `java:S1481`.
    pub key: String,
    pub language: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ActiveRule {
    pub fn new(key: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            language: language.into(),
            params: BTreeMap::new(),
        }
    }

    /// The repository part of the rule key (`java` for `java:S1481`).
    pub fn repository(&self) -> &str {
        self.key.split(':').next().unwrap_or(&self.key)
    }
}

/// Effective analysis configuration for one scope, resolved at execution time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub active_rules: Vec<ActiveRule>,
    pub properties: BTreeMap<String, String>,
}

/// A single issue raised by a rule against a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_key: String,
    pub file: FileId,
    pub message: String,
    /// 1-based line, absent for file-level findings.
    pub line: Option<u32>,
}

/// Summary of one completed analysis run.
///
/// `findings` is filled in by the orchestrator from what the engine streamed
/// to the [`ResultSink`]; engines do not need to populate it themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub findings: Vec<Finding>,
    pub failed_files: Vec<FileId>,
    pub duration: Duration,
}

/// Per-finding listener. Invoked by the engine while the analysis runs, so
/// clients can stream results before the run completes.
pub trait ResultSink: Send + Sync {
    fn accept(&self, finding: Finding);
}

impl<F> ResultSink for F
where
    F: Fn(Finding) + Send + Sync,
{
    fn accept(&self, finding: Finding) {
        self(finding)
    }
}

/// Everything the engine needs for one analysis run.
pub struct AnalysisRequest<'a> {
    pub scope: &'a ScopeId,
    /// Empty = all files in scope.
    pub files: &'a FileSet,
    pub config: &'a AnalysisConfig,
    /// The sensors that survived optimizer pruning. Engines that do their own
    /// sensor dispatch may ignore this.
    pub sensors: &'a [SensorDescriptor],
    pub sink: &'a dyn ResultSink,
    pub monitor: &'a CancelMonitor,
}

/// The external analysis engine boundary.
///
/// Implementations must observe `request.monitor` at bounded intervals and
/// surface cancellation as [`EngineError::Cancelled`]; anything else is an
/// engine-internal failure that fails the single command, not the worker
/// loop.
pub trait AnalysisEngine: Send + Sync {
    fn run_analysis(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutcome, EngineError>;

    /// Tear down all engine state for a scope. Called when the client reports
    /// the scope is gone.
    fn unregister_scope(&self, scope: &ScopeId);

    /// The analysis sub-units the engine would run for this scope, used for
    /// optimizer pruning. Engines that cannot enumerate their sensors return
    /// an empty list and nothing is pruned.
    fn sensors(&self, scope: &ScopeId) -> Vec<SensorDescriptor> {
        let _ = scope;
        Vec::new()
    }

    /// A fingerprint of the current contents of `files` (or of the whole
    /// scope when empty). Combined with rules and configuration to form the
    /// result cache key; an `Err` makes the run bypass the cache.
    fn input_fingerprint(&self, scope: &ScopeId, files: &FileSet) -> anyhow::Result<Fingerprint>;
}

/// Orchestrator-side language hint derived from a file's extension.
///
/// Only used by the execution optimizer to prune sensors that cannot match
/// any file in a scope; the engine remains the authority on real language
/// detection.
pub fn language_for_file(file: &FileId) -> Option<&'static str> {
    let extension = file.extension()?;
    let language = match extension.as_str() {
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "py" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "js",
        "ts" | "tsx" => "ts",
        "rb" => "ruby",
        "go" => "go",
        "php" => "php",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "cs",
        "rs" => "rust",
        "scala" => "scala",
        "html" | "htm" => "html",
        "css" => "css",
        "xml" => "xml",
        "yml" | "yaml" => "yaml",
        "json" => "json",
        _ => return None,
    };
    Some(language)
}
