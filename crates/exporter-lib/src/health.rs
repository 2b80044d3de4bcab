//! Poller health tracking for liveness and readiness probes

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerStatus {
    /// Last cycle published every addon annotation
    Healthy,
    /// Last cycle completed but skipped malformed annotations
    Degraded,
    /// Last cycle failed
    Unhealthy,
}

impl PollerStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, PollerStatus::Healthy | PollerStatus::Degraded)
    }
}

/// Health response served on `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: PollerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_timestamp: Option<i64>,
}

/// Readiness response served on `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthInner {
    status: PollerStatus,
    message: Option<String>,
    consecutive_failures: u32,
    last_success_timestamp: Option<i64>,
}

/// Shared poller health, written by the poller and read by the probes
#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthInner>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthInner {
                status: PollerStatus::Healthy,
                message: None,
                consecutive_failures: 0,
                last_success_timestamp: None,
            })),
        }
    }

    /// Record a completed cycle. `skipped` counts malformed annotations that
    /// were left out.
    pub async fn record_success(&self, skipped: usize) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        inner.last_success_timestamp = Some(chrono::Utc::now().timestamp());
        if skipped == 0 {
            inner.status = PollerStatus::Healthy;
            inner.message = None;
        } else {
            inner.status = PollerStatus::Degraded;
            inner.message = Some(format!("{skipped} malformed addon annotation(s) skipped"));
        }
    }

    /// Record a failed cycle
    pub async fn record_failure(&self, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.status = PollerStatus::Unhealthy;
        inner.message = Some(message.into());
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.read().await;
        HealthResponse {
            status: inner.status,
            message: inner.message.clone(),
            consecutive_failures: inner.consecutive_failures,
            last_success_timestamp: inner.last_success_timestamp,
        }
    }

    /// Ready once a cycle has completed and the latest one did not fail
    pub async fn readiness(&self) -> ReadinessResponse {
        let inner = self.inner.read().await;

        if inner.last_success_timestamp.is_none() {
            ReadinessResponse {
                ready: false,
                reason: Some("No poll cycle completed yet".to_string()),
            }
        } else if !inner.status.is_operational() {
            ReadinessResponse {
                ready: false,
                reason: Some("Last poll cycle failed".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
