//! Error taxonomy for the exporter
//!
//! Configuration errors are fatal at startup. Fetch and decode errors fail
//! the current poll cycle; what happens next is decided by the poller's
//! failure policy.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level exporter error
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed addon annotation {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: DecodeError,
    },

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ExporterError {
    /// Short label used for the `kind` dimension of the error counter
    pub fn kind(&self) -> &'static str {
        match self {
            ExporterError::Config(_) => "config",
            ExporterError::Fetch(FetchError::Timeout { .. }) => "timeout",
            ExporterError::Fetch(_) => "fetch",
            ExporterError::Decode { .. } => "decode",
            ExporterError::Metrics(_) => "metrics",
        }
    }
}

/// Bad credentials, kubeconfig path, or settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("in-cluster credentials unavailable: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    #[error("failed to load kubeconfig {}: {source}", path.display())]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("failed to create kubernetes client: {0}")]
    Client(#[source] kube::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The control plane could not return the namespace
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to get namespace {namespace}: {source}")]
    Api {
        namespace: String,
        #[source]
        source: kube::Error,
    },

    #[error("getting namespace {namespace} timed out after {timeout:?}")]
    Timeout { namespace: String, timeout: Duration },
}

/// An annotation value is not valid addon JSON
#[derive(Debug, Error)]
#[error("invalid addon metadata: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

pub type Result<T, E = ExporterError> = std::result::Result<T, E>;
