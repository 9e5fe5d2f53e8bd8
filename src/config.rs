//! Layered configuration.
//!
//! Precedence, lowest to highest: built-in defaults, optional TOML file,
//! environment variables prefixed `MEMPOOL` (nested keys joined with `__`,
//! e.g. `MEMPOOL_POLL__PERIOD=3s`). Validated once after loading; the rest of
//! the process trusts the result.

use std::{net::SocketAddr, path::Path, time::Duration};

use config as cfg;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] cfg::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Upstream node connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCfg {
    /// JSON-RPC endpoint of the node whose mempool is tracked.
    pub rpc_url: String,
    /// Per-request timeout of the RPC client.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for NodeCfg {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Snapshot polling and prune fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollCfg {
    /// Time between upstream snapshots.
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Worker width of the prune classification pool.
    pub concurrency: usize,
}

impl Default for PollCfg {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            concurrency: 8,
        }
    }
}

/// Pub/sub topics and the event channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishCfg {
    pub queued_entry_topic: String,
    pub queued_exit_topic: String,
    pub pending_entry_topic: String,
    pub pending_exit_topic: String,
    /// Capacity of the in-process event channel.
    pub capacity: usize,
    /// Kafka bootstrap servers; only honored by binaries built with the
    /// `kafka` feature.
    pub kafka_brokers: Option<String>,
}

impl Default for PublishCfg {
    fn default() -> Self {
        Self {
            queued_entry_topic: "queued_tx_entry".into(),
            queued_exit_topic: "queued_tx_exit".into(),
            pending_entry_topic: "pending_tx_entry".into(),
            pending_exit_topic: "pending_tx_exit".into(),
            capacity: crate::publish::DEFAULT_EVENT_CAPACITY,
            kafka_brokers: None,
        }
    }
}

/// Logging.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryCfg {
    /// RUST_LOG-style directive, e.g. "info,mempool_tracker=debug".
    pub log_filter: String,
    /// JSON logs instead of human-readable text.
    pub json: bool,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            json: true,
        }
    }
}

/// Health/metrics listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
    pub bind: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9090".into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeCfg,
    pub poll: PollCfg,
    pub publish: PublishCfg,
    pub telemetry: TelemetryCfg,
    pub server: ServerCfg,
}

impl Config {
    /// Loads defaults, then the file (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = cfg::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(cfg::File::from(path));
        }
        builder = builder.add_source(cfg::Environment::with_prefix("MEMPOOL").separator("__"));
        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc_url()?;
        self.server_addr()?;
        if self.poll.concurrency == 0 {
            return Err(ConfigError::Invalid("poll.concurrency must be positive".into()));
        }
        if self.poll.period.is_zero() {
            return Err(ConfigError::Invalid("poll.period must be positive".into()));
        }
        for (key, topic) in [
            ("publish.queued_entry_topic", &self.publish.queued_entry_topic),
            ("publish.queued_exit_topic", &self.publish.queued_exit_topic),
            ("publish.pending_entry_topic", &self.publish.pending_entry_topic),
            ("publish.pending_exit_topic", &self.publish.pending_exit_topic),
        ] {
            if topic.is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn rpc_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.node.rpc_url)
            .map_err(|e| ConfigError::Invalid(format!("node.rpc_url {:?}: {e}", self.node.rpc_url)))
    }

    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server.bind {:?}: {e}", self.server.bind)))
    }
}
