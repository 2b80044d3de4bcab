//! Observability infrastructure for the exporter
//!
//! Provides:
//! - Prometheus self-metrics (poll latency, cycle and error counts, published addons)
//! - Structured JSON logging with tracing

use crate::error::ExporterError;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for poll cycle latency (in seconds)
const POLL_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Exporter self-metrics
///
/// Cheap to clone; clones share the same underlying collectors.
#[derive(Clone)]
pub struct ExporterMetrics {
    poll_duration_seconds: Histogram,
    poll_cycles: IntCounter,
    poll_errors: IntCounterVec,
    addons_published: IntGauge,
    last_success_timestamp: IntGauge,
}

impl ExporterMetrics {
    /// Create the self-metrics and register them in `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            poll_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "addon_exporter_poll_duration_seconds",
                    "Time spent on one fetch, decode and publish cycle",
                )
                .buckets(POLL_LATENCY_BUCKETS.to_vec()),
            )?,
            poll_cycles: IntCounter::new(
                "addon_exporter_poll_cycles_total",
                "Total number of completed poll cycles",
            )?,
            poll_errors: IntCounterVec::new(
                Opts::new(
                    "addon_exporter_poll_errors_total",
                    "Total number of poll errors by kind",
                ),
                &["kind"],
            )?,
            addons_published: IntGauge::new(
                "addon_exporter_addons_published",
                "Number of addons published in the last completed cycle",
            )?,
            last_success_timestamp: IntGauge::new(
                "addon_exporter_last_success_timestamp_seconds",
                "Unix time of the last completed poll cycle",
            )?,
        };

        registry.register(Box::new(metrics.poll_duration_seconds.clone()))?;
        registry.register(Box::new(metrics.poll_cycles.clone()))?;
        registry.register(Box::new(metrics.poll_errors.clone()))?;
        registry.register(Box::new(metrics.addons_published.clone()))?;
        registry.register(Box::new(metrics.last_success_timestamp.clone()))?;

        Ok(metrics)
    }

    /// Record a completed cycle
    pub fn observe_cycle(&self, elapsed: Duration, published: usize) {
        self.poll_duration_seconds.observe(elapsed.as_secs_f64());
        self.poll_cycles.inc();
        self.addons_published.set(published as i64);
        self.last_success_timestamp.set(chrono::Utc::now().timestamp());
    }

    /// Count a failed cycle or a skipped annotation
    pub fn inc_error(&self, kind: &str) {
        self.poll_errors.with_label_values(&[kind]).inc();
    }

    #[cfg(test)]
    pub(crate) fn cycles(&self) -> u64 {
        self.poll_cycles.get()
    }

    #[cfg(test)]
    pub(crate) fn errors(&self, kind: &str) -> u64 {
        self.poll_errors.with_label_values(&[kind]).get()
    }
}

/// Structured logger for exporter events
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, listen_address: &str, encoding: &str) {
        info!(
            event = "exporter_started",
            namespace = %self.namespace,
            exporter_version = %version,
            listen_address = %listen_address,
            encoding = %encoding,
            "Addon exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Addon exporter shutting down"
        );
    }

    pub fn log_cycle(
        &self,
        annotations: usize,
        published: usize,
        skipped: usize,
        elapsed: Duration,
    ) {
        info!(
            event = "poll_cycle_completed",
            namespace = %self.namespace,
            annotations = annotations,
            published = published,
            skipped = skipped,
            elapsed_ms = elapsed.as_millis() as u64,
            "Poll cycle complete"
        );
    }

    /// Log a failed cycle. `fatal` marks failures that stop the poller.
    pub fn log_cycle_failure(&self, err: &ExporterError, fatal: bool) {
        if fatal {
            error!(
                event = "poll_cycle_failed",
                namespace = %self.namespace,
                kind = err.kind(),
                error = %err,
                fatal = true,
                "Poll cycle failed, stopping exporter"
            );
        } else {
            warn!(
                event = "poll_cycle_failed",
                namespace = %self.namespace,
                kind = err.kind(),
                error = %err,
                fatal = false,
                "Poll cycle failed, retrying at next interval"
            );
        }
    }

    /// Log a malformed addon annotation that was left out of the cycle
    pub fn log_annotation_skipped(&self, key: &str, err: &ExporterError) {
        warn!(
            event = "annotation_skipped",
            namespace = %self.namespace,
            annotation = %key,
            error = %err,
            "Skipping malformed addon annotation"
        );
    }
}
