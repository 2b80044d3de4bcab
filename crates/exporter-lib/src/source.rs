//! Namespace annotation source
//!
//! The poller only needs the annotation map of one namespace. The
//! [`NamespaceSource`] trait captures that, and [`KubeNamespaceSource`]
//! implements it against the Kubernetes API.

use crate::error::{ConfigError, FetchError};
use crate::models::AnnotationEntry;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read-only access to a namespace's annotations
#[async_trait]
pub trait NamespaceSource: Send + Sync {
    /// Return every annotation on the named namespace. A namespace without
    /// annotations yields an empty list.
    async fn namespace_annotations(&self, namespace: &str)
        -> Result<Vec<AnnotationEntry>, FetchError>;
}

/// How the exporter authenticates against the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMode {
    /// Service-account credentials mounted into the pod
    InCluster,
    /// An external kubeconfig file
    Kubeconfig(PathBuf),
}

/// [`NamespaceSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNamespaceSource {
    api: Api<Namespace>,
}

impl KubeNamespaceSource {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    /// Build a client for the given credential mode
    pub async fn connect(mode: &ClientMode) -> Result<Self, ConfigError> {
        let config = match mode {
            ClientMode::InCluster => {
                info!("Using in-cluster service account credentials");
                Config::incluster()?
            }
            ClientMode::Kubeconfig(path) => {
                info!(kubeconfig = %path.display(), "Using kubeconfig credentials");
                load_kubeconfig(path).await?
            }
        };

        let client = Client::try_from(config).map_err(ConfigError::Client)?;
        Ok(Self::new(client))
    }
}

async fn load_kubeconfig(path: &Path) -> Result<Config, ConfigError> {
    let to_config_error = |source| ConfigError::Kubeconfig {
        path: path.to_path_buf(),
        source,
    };

    let kubeconfig = Kubeconfig::read_from(path).map_err(to_config_error)?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(to_config_error)
}

#[async_trait]
impl NamespaceSource for KubeNamespaceSource {
    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<Vec<AnnotationEntry>, FetchError> {
        let ns = self
            .api
            .get(namespace)
            .await
            .map_err(|source| FetchError::Api {
                namespace: namespace.to_string(),
                source,
            })?;

        let annotations: Vec<AnnotationEntry> = ns
            .metadata
            .annotations
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| AnnotationEntry::new(key, value))
            .collect();

        debug!(
            namespace = %namespace,
            annotations = annotations.len(),
            "Fetched namespace annotations"
        );

        Ok(annotations)
    }
}
