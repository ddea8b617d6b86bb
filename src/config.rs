//! Configuration management for Tollgate.
//!
//! Configuration is layered: built-in defaults, then an optional file
//! (YAML, TOML or JSON, picked by extension), then `TOLLGATE__*`
//! environment variables such as `TOLLGATE__LIMITER__BACKEND=gossip`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::mesh::ClusterConfig;
use crate::ratelimit::DEFAULT_SWEEP_INTERVAL;

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Gossip mesh configuration, used by the gossip backend
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Where rate limit entries live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map
    #[default]
    Memory,
    /// Shared between nodes over the gossip mesh
    Gossip,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Entry store backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Seconds between sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Path to a YAML file of named policies, overlaid on the built-ins
    #[serde(default)]
    pub policies_path: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            sweep_interval_secs: default_sweep_interval(),
            policies_path: None,
        }
    }
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

impl LimiterConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Gossip mesh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Node identifier; a random UUID when unset
    #[serde(default)]
    pub node_id: Option<String>,

    /// Gossip listen address
    #[serde(default = "default_gossip_addr")]
    pub listen_addr: SocketAddr,

    /// Address advertised to peers; the listen address when unset
    #[serde(default)]
    pub advertise_addr: Option<SocketAddr>,

    /// Peers to contact on startup
    #[serde(default)]
    pub seed_nodes: Vec<String>,

    /// Nodes only gossip with peers sharing this ID
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Gossip round interval in milliseconds
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,

    /// Seconds before a dead node's state may be dropped
    #[serde(default = "default_dead_node_grace_period")]
    pub dead_node_grace_period_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_id: None,
            listen_addr: default_gossip_addr(),
            advertise_addr: None,
            seed_nodes: Vec::new(),
            cluster_id: default_cluster_id(),
            gossip_interval_ms: default_gossip_interval(),
            dead_node_grace_period_secs: default_dead_node_grace_period(),
        }
    }
}

fn default_gossip_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}

fn default_cluster_id() -> String {
    "tollgate".to_string()
}

fn default_gossip_interval() -> u64 {
    100
}

fn default_dead_node_grace_period() -> u64 {
    3600
}

impl ClusterSettings {
    /// Build the mesh configuration, generating a node ID if none is set.
    pub fn to_cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            node_id: self
                .node_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            listen_addr: self.listen_addr,
            advertise_addr: self.advertise_addr.unwrap_or(self.listen_addr),
            seed_nodes: self.seed_nodes.clone(),
            cluster_id: self.cluster_id.clone(),
            gossip_interval: Duration::from_millis(self.gossip_interval_ms),
            dead_node_grace_period: Duration::from_secs(self.dead_node_grace_period_secs),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TOLLGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall background tasks.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "limiter.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.cluster.gossip_interval_ms == 0 {
            return Err(TollgateError::Config(
                "cluster.gossip_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.cluster.cluster_id.is_empty() {
            return Err(TollgateError::Config(
                "cluster.cluster_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
