//! Metric registry shared by the poller and the scrape endpoint
//!
//! Holds the `kops_channel_updated` gauge family in an injected Prometheus
//! registry. The poller publishes a whole cycle under the write half of a
//! lock and scrapes gather under the read half, so a scrape never observes a
//! partially published cycle.
//!
//! Series are only ever added or overwritten. An addon that disappears from
//! the namespace keeps its last value until the process restarts.

use crate::encoder::SignalEncoder;
use crate::models::AddonSignal;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the published addon gauge
pub const ADDON_METRIC_NAME: &str = "kops_channel_updated";

const ADDON_METRIC_HELP: &str = "Last time the addon was updated.";

/// Label values (in encoder label order) mapped to the gauge value
#[cfg(test)]
pub(crate) type AddonSnapshot = std::collections::BTreeMap<Vec<String>, f64>;

#[derive(Clone)]
pub struct AddonRegistry {
    registry: Registry,
    updated: GaugeVec,
    encoder: Arc<dyn SignalEncoder>,
    publish_lock: Arc<RwLock<()>>,
}

impl AddonRegistry {
    /// Create a registry whose addon gauge uses the encoder's label set
    pub fn new(encoder: Arc<dyn SignalEncoder>) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let updated = GaugeVec::new(
            Opts::new(ADDON_METRIC_NAME, ADDON_METRIC_HELP),
            encoder.label_names(),
        )?;
        registry.register(Box::new(updated.clone()))?;

        Ok(Self {
            registry,
            updated,
            encoder,
            publish_lock: Arc::new(RwLock::new(())),
        })
    }

    pub fn encoder(&self) -> &Arc<dyn SignalEncoder> {
        &self.encoder
    }

    /// Underlying Prometheus registry, for registering exporter self-metrics
    pub fn prometheus(&self) -> &Registry {
        &self.registry
    }

    /// Write one cycle's signals, overwriting prior values for the same
    /// label sets. Scrapes wait until the whole batch is applied.
    pub async fn publish(&self, signals: &[AddonSignal]) -> prometheus::Result<()> {
        let _guard = self.publish_lock.write().await;

        for signal in signals {
            let values = self.encoder.label_values(signal);
            self.updated
                .get_metric_with_label_values(&values)?
                .set(signal.value);
        }

        Ok(())
    }

    /// Gather every metric family in the registry
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let _guard = self.publish_lock.read().await;
        self.registry.gather()
    }

    /// Render the registry in the Prometheus text exposition format
    pub async fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        let metric_families = self.gather().await;
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Current addon series, keyed by label values in encoder order
    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> AddonSnapshot {
        let label_names = self.encoder.label_names();
        let mut snapshot = AddonSnapshot::new();

        for family in self.gather().await {
            if family.get_name() != ADDON_METRIC_NAME {
                continue;
            }
            for metric in family.get_metric() {
                let labels: std::collections::BTreeMap<&str, &str> = metric
                    .get_label()
                    .iter()
                    .map(|pair| (pair.get_name(), pair.get_value()))
                    .collect();
                let key = label_names
                    .iter()
                    .map(|name| labels.get(name).copied().unwrap_or_default().to_string())
                    .collect();
                snapshot.insert(key, metric.get_gauge().get_value());
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{HashedIdentity, LastSeenTimestamp};

    fn signal(name: &str, version: &str, value: f64) -> AddonSignal {
        AddonSignal {
            name: name.to_string(),
            channel: "stable".to_string(),
            version: version.to_string(),
            id: String::new(),
            value,
        }
    }

    fn key(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_publish_overwrites_same_label_set() {
        let registry = AddonRegistry::new(Arc::new(HashedIdentity)).unwrap();

        registry.publish(&[signal("dns", "1.2.3", 1.0)]).await.unwrap();
        registry.publish(&[signal("dns", "1.2.4", 2.0)]).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&key(&["dns"])], 2.0);
    }

    #[tokio::test]
    async fn test_stale_series_are_kept() {
        let registry = AddonRegistry::new(Arc::new(HashedIdentity)).unwrap();

        registry
            .publish(&[signal("dns", "1", 1.0), signal("core", "1", 3.0)])
            .await
            .unwrap();
        registry.publish(&[signal("dns", "1", 1.0)]).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&key(&["core"])], 3.0);
    }

    #[tokio::test]
    async fn test_full_labels_create_series_per_identity() {
        let registry = AddonRegistry::new(Arc::new(LastSeenTimestamp::new())).unwrap();

        registry.publish(&[signal("dns", "1.2.3", 10.0)]).await.unwrap();
        registry.publish(&[signal("dns", "1.2.4", 20.0)]).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&key(&["dns", "stable", "1.2.3", ""])], 10.0);
        assert_eq!(snapshot[&key(&["dns", "stable", "1.2.4", ""])], 20.0);
    }

    #[tokio::test]
    async fn test_encode_text_exposition() {
        let registry = AddonRegistry::new(Arc::new(HashedIdentity)).unwrap();
        registry
            .publish(&[signal("dns", "1.2.3", 11593946.0)])
            .await
            .unwrap();

        let text = String::from_utf8(registry.encode_text().await.unwrap()).unwrap();
        assert!(text.contains("# TYPE kops_channel_updated gauge"));
        assert!(text.contains("kops_channel_updated{name=\"dns\"} 11593946"));
    }

    #[tokio::test]
    async fn test_empty_registry_encodes() {
        let registry = AddonRegistry::new(Arc::new(HashedIdentity)).unwrap();
        assert!(registry.snapshot().await.is_empty());
        assert!(registry.encode_text().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scrape_never_sees_partial_publish() {
        let registry = AddonRegistry::new(Arc::new(HashedIdentity)).unwrap();
        let names: Vec<String> = (0..200).map(|i| format!("addon-{i}")).collect();

        let batch = |value: f64| -> Vec<AddonSignal> {
            names.iter().map(|n| signal(n, "1", value)).collect()
        };
        registry.publish(&batch(1.0)).await.unwrap();

        let writer = {
            let registry = registry.clone();
            let batches: Vec<Vec<AddonSignal>> =
                (2..20).map(|v| batch(v as f64)).collect();
            tokio::spawn(async move {
                for b in batches {
                    registry.publish(&b).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = registry.snapshot().await;
            assert_eq!(snapshot.len(), 200);
            let first = *snapshot.values().next().unwrap();
            assert!(snapshot.values().all(|v| *v == first));
        }
        writer.await.unwrap();
    }
}
