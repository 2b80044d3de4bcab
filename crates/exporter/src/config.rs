//! Exporter configuration
//!
//! Defaults are overridden by an optional config file, then by
//! `ADDON_EXPORTER_*` environment variables, then by command-line flags.

use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::{ClientMode, DecodeFailurePolicy, EncodingPolicy, FailurePolicy, PollerConfig};
use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Republishes kops addon annotations as Prometheus gauges
#[derive(Debug, Default, Parser)]
#[command(name = "addon-exporter", version)]
pub struct Cli {
    /// Path to a configuration file (TOML, YAML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The address to listen on for HTTP requests
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Absolute path to the kubeconfig file, used when not in-cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Use in-cluster service account credentials
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub in_cluster: Option<bool>,

    /// Namespace carrying the addon annotations
    #[arg(long)]
    pub namespace: Option<String>,

    /// Seconds between poll cycles
    #[arg(long)]
    pub refresh_interval_secs: Option<u64>,

    /// Seconds before a namespace fetch is abandoned, 0 disables the timeout
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    /// Gauge encoding: hashed or timestamp
    #[arg(long)]
    pub encoding: Option<String>,

    /// Reaction to a failed cycle: crash or skip-cycle
    #[arg(long)]
    pub failure_policy: Option<String>,

    /// Reaction to a malformed addon annotation: abort or skip
    #[arg(long)]
    pub decode_failures: Option<String>,
}

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// HTTP listen address as `host:port`, a bare `:port` binds every interface
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Kubeconfig path for out-of-cluster mode
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: PathBuf,

    #[serde(default = "default_in_cluster")]
    pub in_cluster: bool,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub encoding: EncodingPolicy,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub decode_failures: DecodeFailurePolicy,
}

fn default_listen_address() -> String {
    ":9598".to_string()
}

fn default_kubeconfig() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}

fn default_in_cluster() -> bool {
    true
}

fn default_namespace() -> String {
    exporter_lib::poller::DEFAULT_NAMESPACE.to_string()
}

fn default_refresh_interval() -> u64 {
    exporter_lib::poller::DEFAULT_REFRESH_INTERVAL.as_secs()
}

fn default_fetch_timeout() -> u64 {
    exporter_lib::poller::DEFAULT_FETCH_TIMEOUT.as_secs()
}

impl ExporterConfig {
    /// Load configuration from file, environment and flags
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("ADDON_EXPORTER").try_parsing(true))
            .set_override_option("listen_address", cli.listen_address.clone())?
            .set_override_option(
                "kubeconfig",
                cli.kubeconfig
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )?
            .set_override_option("in_cluster", cli.in_cluster)?
            .set_override_option("namespace", cli.namespace.clone())?
            .set_override_option("refresh_interval_secs", cli.refresh_interval_secs)?
            .set_override_option("fetch_timeout_secs", cli.fetch_timeout_secs)?
            .set_override_option("encoding", cli.encoding.clone())?
            .set_override_option("failure_policy", cli.failure_policy.clone())?
            .set_override_option("decode_failures", cli.decode_failures.clone())?
            .build()
            .context("Failed to build configuration")?;

        let config: ExporterConfig = config
            .try_deserialize()
            .context("Invalid exporter configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be greater than zero");
        }
        if self.namespace.is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        self.listen_port()?;
        Ok(())
    }

    fn listen_port(&self) -> Result<u16> {
        self.listen_address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .with_context(|| {
                format!(
                    "Invalid listen address {:?}, expected host:port or :port",
                    self.listen_address
                )
            })
    }

    /// Candidate bind addresses for the listen address, in the order to try.
    ///
    /// A bare `:port` yields the IPv6 wildcard, which also accepts IPv4 on
    /// dual-stack hosts, followed by the IPv4 wildcard for hosts without
    /// IPv6. Host names are resolved.
    pub async fn listen_addrs(&self) -> Result<Vec<SocketAddr>> {
        if self.listen_address.starts_with(':') {
            let port = self.listen_port()?;
            return Ok(vec![
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ]);
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(self.listen_address.as_str())
            .await
            .with_context(|| format!("Failed to resolve listen address {:?}", self.listen_address))?
            .collect();
        if addrs.is_empty() {
            anyhow::bail!("Listen address {:?} resolved to nothing", self.listen_address);
        }
        Ok(addrs)
    }

    pub fn client_mode(&self) -> ClientMode {
        if self.in_cluster {
            ClientMode::InCluster
        } else {
            ClientMode::Kubeconfig(self.kubeconfig.clone())
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            namespace: self.namespace.clone(),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            fetch_timeout: (self.fetch_timeout_secs > 0)
                .then(|| Duration::from_secs(self.fetch_timeout_secs)),
            failure_policy: self.failure_policy,
            decode_failures: self.decode_failures,
        }
    }
}
