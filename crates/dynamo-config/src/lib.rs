//! Node configuration for the Dynamo-style key-value store.
//!
//! Loaded hierarchically from multiple sources, highest precedence first:
//! 1. CLI arguments (applied by the caller after [`NodeConfig::load`] returns)
//! 2. Environment variables (`DYNAMO_*` prefix)
//! 3. `dynamo.local.toml` (gitignored, host-local overrides)
//! 4. `dynamo.toml` (deployment-tracked node config)
//! 5. `~/.config/dynamo/config.toml` (user defaults)
//! 6. Built-in defaults (lowest precedence)

use std::path::{Path, PathBuf};

use dynamo_types::Hostname;
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// A single node's operating parameters.
///
/// Field names follow the terms used across the wire and storage layers
/// (`replication_factor` is `Qsize`, `r`/`w` are the read/write quorum
/// sizes) so that a deployment's `dynamo.toml` reads the same vocabulary as
/// the rest of the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's own address, as other members dial it.
    pub hostname: String,
    /// The address of a running member to contact for cluster bootstrap, or
    /// `None` to start a brand-new single-node cluster.
    pub leader: Option<String>,
    /// Total replica count per key (`Qsize`).
    pub replication_factor: usize,
    /// Read quorum size.
    pub r: usize,
    /// Write quorum size.
    pub w: usize,
    /// TCP port the node listens on for peer and client connections.
    pub tcp_port: u16,
    /// Seconds a coordinator waits for quorum before declaring a request
    /// failed and (for writes) falling back to hinted handoff.
    pub request_timelimit: f64,
    /// Seconds between retries of a pending handoff delivery.
    pub handoff_retry_period: u64,
    /// Directory holding this node's `<host>.db`, `<host>.ring`, and
    /// `<host>.handoff` files.
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            leader: None,
            replication_factor: 5,
            r: 3,
            w: 3,
            tcp_port: 13337,
            request_timelimit: 2.0,
            handoff_retry_period: 5,
            data_dir: PathBuf::from(".dynamo"),
        }
    }
}

impl NodeConfig {
    /// Loads configuration from the default locations relative to the
    /// current working directory.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Loads configuration from a specific node directory, e.g. the
    /// directory passed on the command line via `--data-dir`.
    pub fn load_from_dir(node_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_node_dir(node_dir).load()
    }

    pub fn hostname(&self) -> Hostname {
        Hostname::from(self.hostname.as_str())
    }

    pub fn leader_hostname(&self) -> Option<Hostname> {
        self.leader.as_deref().map(Hostname::from)
    }

    /// Resolves `data_dir` to an absolute path rooted at `base_dir`, if it
    /// was given as relative.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if self.data_dir.is_relative() {
            self.data_dir = base_dir.as_ref().join(&self.data_dir);
        }
    }

    /// Rejects configurations that cannot produce a coherent quorum, per
    /// the data model's `R + W > N` availability/consistency tradeoff.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication_factor == 0 {
            return Err(ConfigError::ValidationError(
                "replication_factor must be at least 1".to_string(),
            ));
        }
        if self.r == 0 || self.w == 0 {
            return Err(ConfigError::ValidationError(
                "r and w must be at least 1".to_string(),
            ));
        }
        if self.r > self.replication_factor || self.w > self.replication_factor {
            return Err(ConfigError::ValidationError(format!(
                "r ({}) and w ({}) must not exceed replication_factor ({})",
                self.r, self.w, self.replication_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = NodeConfig::default();
        assert_eq!(config.replication_factor, 5);
        assert_eq!(config.r, 3);
        assert_eq!(config.w, 3);
        assert_eq!(config.tcp_port, 13337);
    }

    #[test]
    fn default_config_validates() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn quorum_larger_than_replication_factor_is_rejected() {
        let config = NodeConfig {
            replication_factor: 3,
            r: 4,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn path_resolution_joins_relative_data_dir() {
        let mut config = NodeConfig::default();
        config.resolve_paths("/var/lib/dynamo-node-a");
        assert_eq!(
            config.data_dir,
            PathBuf::from("/var/lib/dynamo-node-a/.dynamo")
        );
    }

    #[test]
    fn absolute_data_dir_is_left_untouched() {
        let mut config = NodeConfig {
            data_dir: PathBuf::from("/data/dynamo"),
            ..NodeConfig::default()
        };
        config.resolve_paths("/var/lib/dynamo-node-a");
        assert_eq!(config.data_dir, PathBuf::from("/data/dynamo"));
    }
}
