//! Addon exporter library
//!
//! This crate provides the core functionality for:
//! - Reading addon annotations from a Kubernetes namespace
//! - Decoding addon metadata and encoding it as gauge values
//! - A scrape-safe metric registry
//! - The periodic poll loop, health tracking and observability

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod poller;
pub mod registry;
pub mod source;

pub use encoder::{EncodingPolicy, HashedIdentity, LastSeenTimestamp, SignalEncoder};
pub use error::{ConfigError, DecodeError, ExporterError, FetchError};
pub use health::{HealthResponse, HealthState, PollerStatus, ReadinessResponse};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use poller::{DecodeFailurePolicy, FailurePolicy, Poller, PollerBuilder, PollerConfig};
pub use registry::{AddonRegistry, ADDON_METRIC_NAME};
pub use source::{ClientMode, KubeNamespaceSource, NamespaceSource};
