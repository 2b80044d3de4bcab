//! Addon poll loop
//!
//! Each cycle fetches the annotations of one namespace, decodes every
//! `addons.k8s.io/` annotation, encodes the records and publishes them into
//! the registry. Cycles run strictly one after another with a fixed sleep in
//! between; a scrape during a cycle sees the previous cycle's values.

use crate::decoder::{addon_name, decode};
use crate::error::{ExporterError, FetchError, Result};
use crate::health::HealthState;
use crate::models::{AddonRecord, AddonSignal, AnnotationEntry};
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::registry::AddonRegistry;
use crate::source::NamespaceSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Namespace kops records addon installations on
pub const DEFAULT_NAMESPACE: &str = "kube-system";

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded record paired with its addon name
type NamedRecord = (String, AddonRecord);

/// What the poller does when a cycle fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the poller and surface the error, leaving restarts to the supervisor
    #[default]
    Crash,
    /// Log the error and try again after the refresh interval
    SkipCycle,
}

/// What a cycle does with an annotation that is not valid addon JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeFailurePolicy {
    /// Fail the whole cycle
    #[default]
    Abort,
    /// Leave the annotation out and publish the rest
    Skip,
}

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Namespace whose annotations are read
    pub namespace: String,
    /// Sleep between cycles (default: 15 seconds)
    pub refresh_interval: Duration,
    /// Upper bound on one namespace fetch, `None` waits indefinitely
    pub fetch_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub decode_failures: DecodeFailurePolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            failure_policy: FailurePolicy::default(),
            decode_failures: DecodeFailurePolicy::default(),
        }
    }
}

/// Outcome of one successful cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Annotations on the namespace, addon or not
    pub annotations: usize,
    /// Addon signals written to the registry
    pub published: usize,
    /// Malformed addon annotations left out
    pub skipped: usize,
}

/// Periodically republishes namespace addon annotations as gauges
pub struct Poller {
    source: Arc<dyn NamespaceSource>,
    registry: AddonRegistry,
    config: PollerConfig,
    metrics: ExporterMetrics,
    health: HealthState,
    logger: StructuredLogger,
}

impl Poller {
    pub fn new(
        source: Arc<dyn NamespaceSource>,
        registry: AddonRegistry,
        config: PollerConfig,
        metrics: ExporterMetrics,
        health: HealthState,
    ) -> Self {
        let logger = StructuredLogger::new(&config.namespace);
        Self {
            source,
            registry,
            config,
            metrics,
            health,
            logger,
        }
    }

    /// Run cycles until shutdown is signalled.
    ///
    /// Under [`FailurePolicy::Crash`] the first failed cycle ends the loop
    /// with that error.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            namespace = %self.config.namespace,
            interval_secs = self.config.refresh_interval.as_secs(),
            failure_policy = ?self.config.failure_policy,
            decode_failures = ?self.config.decode_failures,
            "Starting addon poll loop"
        );

        loop {
            tokio::select! {
                result = self.run_cycle() => self.handle_result(result).await?,
                _ = shutdown.recv() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.refresh_interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Shutting down addon poll loop");
        Ok(())
    }

    async fn handle_result(&self, result: Result<CycleReport>) -> Result<()> {
        match result {
            Ok(report) => {
                self.health.record_success(report.skipped).await;
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_error(err.kind());
                self.health.record_failure(err.to_string()).await;

                match self.config.failure_policy {
                    FailurePolicy::Crash => {
                        self.logger.log_cycle_failure(&err, true);
                        Err(err)
                    }
                    FailurePolicy::SkipCycle => {
                        self.logger.log_cycle_failure(&err, false);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Run one fetch, decode and publish cycle
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let start = Instant::now();

        let entries = self.fetch().await?;
        let annotations = entries.len();

        let (records, skipped) = self.decode_all(entries)?;
        let published = self.publish(records).await?;

        let elapsed = start.elapsed();
        self.metrics.observe_cycle(elapsed, published);
        self.logger.log_cycle(annotations, published, skipped, elapsed);

        Ok(CycleReport {
            annotations,
            published,
            skipped,
        })
    }

    async fn fetch(&self) -> Result<Vec<AnnotationEntry>, FetchError> {
        let namespace = self.config.namespace.as_str();
        let request = self.source.namespace_annotations(namespace);

        match self.config.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .map_err(|_| FetchError::Timeout {
                    namespace: namespace.to_string(),
                    timeout,
                })?,
            None => request.await,
        }
    }

    /// Decode every addon annotation, returning `(name, record)` pairs and
    /// the number of annotations skipped
    fn decode_all(&self, entries: Vec<AnnotationEntry>) -> Result<(Vec<NamedRecord>, usize)> {
        let mut records = Vec::new();
        let mut skipped = 0;

        for entry in entries {
            let Some(name) = addon_name(&entry.key) else {
                continue;
            };

            match decode(&entry.raw_value) {
                Ok(record) => records.push((name.to_string(), record)),
                Err(source) => {
                    let err = ExporterError::Decode {
                        key: entry.key.clone(),
                        source,
                    };

                    match self.config.decode_failures {
                        DecodeFailurePolicy::Abort => return Err(err),
                        DecodeFailurePolicy::Skip => {
                            self.logger.log_annotation_skipped(&entry.key, &err);
                            self.metrics.inc_error(err.kind());
                            skipped += 1;
                        }
                    }
                }
            }
        }

        Ok((records, skipped))
    }

    async fn publish(&self, records: Vec<NamedRecord>) -> Result<usize> {
        let encoder = self.registry.encoder();
        let signals: Vec<AddonSignal> = records
            .iter()
            .map(|(name, record)| encoder.encode(name, record))
            .collect();

        for signal in &signals {
            debug!(addon = %signal.name, value = signal.value, "Encoded addon signal");
        }

        self.registry.publish(&signals).await?;
        Ok(signals.len())
    }
}

/// Builder for the poll loop
pub struct PollerBuilder {
    source: Option<Arc<dyn NamespaceSource>>,
    registry: Option<AddonRegistry>,
    metrics: Option<ExporterMetrics>,
    health: Option<HealthState>,
    config: PollerConfig,
}

impl PollerBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            registry: None,
            metrics: None,
            health: None,
            config: PollerConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn NamespaceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn registry(mut self, registry: AddonRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval = interval;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn decode_failures(mut self, policy: DecodeFailurePolicy) -> Self {
        self.config.decode_failures = policy;
        self
    }

    /// Build the poller. Self-metrics are registered in the addon registry
    /// unless a handle was supplied.
    pub fn build(self) -> anyhow::Result<Poller> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Namespace source is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("Registry is required"))?;
        if self.config.refresh_interval.is_zero() {
            anyhow::bail!("Refresh interval must be greater than zero");
        }

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => ExporterMetrics::register(registry.prometheus())?,
        };

        Ok(Poller::new(
            source,
            registry,
            self.config,
            metrics,
            self.health.unwrap_or_default(),
        ))
    }
}

impl Default for PollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
