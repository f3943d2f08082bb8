//! Configuration loader with multi-source merging

use crate::{ConfigError, NodeConfig, Paths};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with a builder-pattern precedence chain.
pub struct ConfigLoader {
    node_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            node_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "DYNAMO".to_string(),
        }
    }

    pub fn with_node_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.node_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads and merges every source, lowest to highest precedence, then
    /// resolves relative paths and validates the result.
    pub fn load(self) -> Result<NodeConfig, ConfigError> {
        let mut builder = config::Config::builder();

        let defaults = NodeConfig::default();
        builder = builder
            .add_source(config::Config::try_from(&defaults).map_err(|e| {
                ConfigError::MergeError(format!("failed to seed defaults: {e}"))
            })?);

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let node_config_file = Paths::node_config_file(&self.node_dir);
        if node_config_file.exists() {
            builder = builder.add_source(
                config::File::from(node_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.node_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| ConfigError::MergeError(e.to_string()))?;

        let mut node_config: NodeConfig = built
            .try_deserialize()
            .map_err(|e| ConfigError::MergeError(e.to_string()))?;

        node_config.resolve_paths(&self.node_dir);
        node_config.validate()?;

        Ok(node_config)
    }

    pub fn load_or_default(self) -> NodeConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
