//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for a node's configuration and data.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("com", "dynamokv", "dynamo"),
        }
    }

    /// `~/.config/dynamo/`
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("failed to determine user config directory".to_string())
            })
    }

    /// `~/.config/dynamo/config.toml`
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// `<node_dir>/dynamo.toml`, the git-tracked deployment config.
    pub fn node_config_file(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join("dynamo.toml")
    }

    /// `<node_dir>/dynamo.local.toml`, gitignored host-local overrides.
    pub fn local_config_file(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join("dynamo.local.toml")
    }

    /// Default on-disk data directory for this node's store and ring/handoff
    /// snapshots, relative to `node_dir`.
    pub fn default_data_dir(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join(".dynamo")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn xdg_paths_mention_dynamo() {
        let paths = Paths::new();
        if let Ok(config_dir) = paths.user_config_dir() {
            assert!(config_dir.to_string_lossy().contains("dynamo"));
        }
    }

    #[test]
    fn node_paths_are_relative_to_node_dir() {
        let temp_dir = tempdir().expect("temp dir");
        let node_dir = temp_dir.path();

        assert_eq!(
            Paths::node_config_file(node_dir),
            node_dir.join("dynamo.toml")
        );
        assert_eq!(
            Paths::local_config_file(node_dir),
            node_dir.join("dynamo.local.toml")
        );
        assert_eq!(Paths::default_data_dir(node_dir), node_dir.join(".dynamo"));
    }
}
