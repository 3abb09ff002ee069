use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

// Latencies are recorded in microseconds.
const LATENCY_SIGFIG: u8 = 3;
// 10 minutes covers even the slowest analysis commands; values above are clamped.
const MAX_LATENCY_US: u64 = 10 * 60 * 1_000_000;

/// Thread-safe runtime metrics registry (counters + per-command latency histograms).
///
/// Recording a metric is a single mutex acquisition and no allocations on the
/// hot path after a command kind is first seen. The registry backs log output,
/// not a stable wire contract.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    commands: HashMap<String, CommandMetrics>,
}

#[derive(Debug)]
struct CommandMetrics {
    executed_count: u64,
    error_count: u64,
    cancelled_count: u64,
    latency_us: Histogram<u64>,
}

impl CommandMetrics {
    fn new() -> Self {
        static HISTOGRAM_BOUNDS_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        let latency_us = Histogram::<u64>::new_with_bounds(1, MAX_LATENCY_US, LATENCY_SIGFIG)
            .unwrap_or_else(|err| {
                if HISTOGRAM_BOUNDS_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "argus.metrics",
                        error = %err,
                        "failed to construct bounded latency histogram; falling back to unbounded histogram"
                    );
                }
                // hdrhistogram only errors for invalid bounds/precision; the
                // default constructor always succeeds.
                Histogram::<u64>::new(LATENCY_SIGFIG).expect("histogram")
            });
        Self {
            executed_count: 0,
            error_count: 0,
            cancelled_count: 0,
            latency_us,
        }
    }
}

impl MetricsRegistry {
    /// Returns the global metrics registry.
    pub fn global() -> &'static MetricsRegistry {
        static GLOBAL: OnceLock<MetricsRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MetricsRegistry::default)
    }

    /// Record a completed command of `kind`, including total execution latency.
    pub fn record_command(&self, kind: &str, duration: Duration) {
        static HISTOGRAM_RECORD_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        let micros = duration.as_micros().min(u128::from(MAX_LATENCY_US)) as u64;
        let micros = micros.max(1);

        let mut inner = self.inner.lock();
        let metrics = inner
            .commands
            .entry(kind.to_owned())
            .or_insert_with(CommandMetrics::new);
        metrics.executed_count = metrics.executed_count.saturating_add(1);
        if let Err(err) = metrics.latency_us.record(micros) {
            if HISTOGRAM_RECORD_ERROR_LOGGED.set(()).is_ok() {
                tracing::debug!(
                    target = "argus.metrics",
                    kind,
                    micros,
                    error = %err,
                    "failed to record latency sample"
                );
            }
        }
    }

    /// Record a command that completed with an engine failure.
    pub fn record_error(&self, kind: &str) {
        let mut inner = self.inner.lock();
        let metrics = inner
            .commands
            .entry(kind.to_owned())
            .or_insert_with(CommandMetrics::new);
        metrics.error_count = metrics.error_count.saturating_add(1);
    }

    /// Record a command that was cancelled before or during execution.
    pub fn record_cancelled(&self, kind: &str) {
        let mut inner = self.inner.lock();
        let metrics = inner
            .commands
            .entry(kind.to_owned())
            .or_insert_with(CommandMetrics::new);
        metrics.cancelled_count = metrics.cancelled_count.saturating_add(1);
    }

    /// Snapshot all recorded metrics, for logging or test assertions.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let commands = inner
            .commands
            .iter()
            .map(|(kind, metrics)| {
                (
                    kind.clone(),
                    CommandSnapshot {
                        executed_count: metrics.executed_count,
                        error_count: metrics.error_count,
                        cancelled_count: metrics.cancelled_count,
                        latency_p50_us: metrics.latency_us.value_at_quantile(0.5),
                        latency_p95_us: metrics.latency_us.value_at_quantile(0.95),
                        latency_max_us: metrics.latency_us.max(),
                    },
                )
            })
            .collect();
        MetricsSnapshot { commands }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub commands: BTreeMap<String, CommandSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandSnapshot {
    pub executed_count: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_max_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_and_errors() {
        let registry = MetricsRegistry::default();
        registry.record_command("analyze", Duration::from_millis(5));
        registry.record_command("analyze", Duration::from_millis(10));
        registry.record_error("analyze");
        registry.record_cancelled("analyze");
        registry.record_command("unregister_scope", Duration::from_micros(3));

        let snapshot = registry.snapshot();
        let analyze = &snapshot.commands["analyze"];
        assert_eq!(analyze.executed_count, 2);
        assert_eq!(analyze.error_count, 1);
        assert_eq!(analyze.cancelled_count, 1);
        assert!(analyze.latency_max_us >= 9_000);
        assert_eq!(snapshot.commands["unregister_scope"].executed_count, 1);
    }

    #[test]
    fn clamps_out_of_range_latencies() {
        let registry = MetricsRegistry::default();
        registry.record_command("analyze", Duration::ZERO);
        registry.record_command("analyze", Duration::from_secs(3600));

        let snapshot = registry.snapshot();
        let analyze = &snapshot.commands["analyze"];
        assert_eq!(analyze.executed_count, 2);
        assert!(analyze.latency_max_us <= MAX_LATENCY_US + MAX_LATENCY_US / 100);
    }
}
