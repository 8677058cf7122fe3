//! # cstore-config
//!
//! Configuration management for the cstore artifact store.
//!
//! Loads configuration from:
//! 1. `~/.cstore/config.toml` (global)
//! 2. `<project>/.cstore/config.toml` (project-local, overrides global)
//! 3. `CSTORE_*` environment variables (highest priority)

pub mod logging;
pub mod testing;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub publish: PublishConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl Config {
    /// Load config from standard locations (CWD-relative project config).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_project(Path::new("."))
    }

    /// Load config for a specific project root directory.
    /// Resolution order: global → project → env vars.
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        let project_path = project_root.join(".cstore/config.toml");
        if project_path.exists() {
            debug!("loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(&project_path)?;
            let project: Config = toml::from_str(&contents)?;
            config.merge(project);
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: `~/.cstore/config.toml`.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cstore/config.toml"))
    }

    /// Merge another config (project overrides global).
    /// Non-default values from `other` replace values in `self`.
    fn merge(&mut self, other: Config) {
        let default_storage = StorageConfig::default();
        if other.storage.root != default_storage.root {
            self.storage.root = other.storage.root;
        }

        let default_publish = PublishConfig::default();
        if other.publish.update_timeout_secs != default_publish.update_timeout_secs {
            self.publish.update_timeout_secs = other.publish.update_timeout_secs;
        }
    }

    /// Apply environment variable overrides (highest priority).
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("CSTORE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Ok(timeout) = std::env::var("CSTORE_UPDATE_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.publish.update_timeout_secs = secs;
            }
        }
    }

    // ========== Convenience accessors ==========

    /// Root of the blob tree.
    pub fn blob_root(&self) -> PathBuf {
        self.storage.root.join("blobs")
    }

    /// Directory of the LMDB lock/index environment.
    pub fn registry_dir(&self) -> PathBuf {
        self.storage.root.join("index")
    }

    /// Publish lease lifetime before a lock is considered abandoned.
    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.publish.update_timeout_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Store root directory; blobs and the index live beneath it.
    /// Env override: CSTORE_ROOT
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .map(|h| h.join(".cstore/store"))
                .unwrap_or_else(|| PathBuf::from("/tmp/cstore")),
        }
    }
}

/// Publish coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishConfig {
    /// Seconds before an abandoned publish lease may be reclaimed.
    /// Env override: CSTORE_UPDATE_TIMEOUT_SECS
    pub update_timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            update_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Serializes tests that modify environment variables.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.publish.update_timeout_secs, 300);
        assert_eq!(config.update_timeout(), Duration::from_secs(300));
        assert!(config.blob_root().ends_with("blobs"));
        assert!(config.registry_dir().ends_with("index"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[storage]
root = "/custom/root"
"#,
        )
        .unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/custom/root"));
        assert_eq!(config.publish.update_timeout_secs, 300);
    }

    #[test]
    fn test_toml_roundtrip() {
        let original = Config::default();
        let parsed: Config = toml::from_str(&toml::to_string(&original).unwrap()).unwrap();
        assert_eq!(original.storage, parsed.storage);
        assert_eq!(original.publish, parsed.publish);
    }

    #[test]
    fn test_project_overrides_global_defaults() {
        let mut base = Config::default();
        let overlay: Config = toml::from_str(
            r#"
[publish]
update_timeout_secs = 30
"#,
        )
        .unwrap();
        base.merge(overlay);
        assert_eq!(base.publish.update_timeout_secs, 30);
        assert_eq!(base.storage, StorageConfig::default());
    }

    #[test]
    fn test_env_override_root() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();

        std::env::set_var("CSTORE_ROOT", "/env/override");
        config.apply_env_overrides();
        std::env::remove_var("CSTORE_ROOT");

        assert_eq!(config.storage.root, PathBuf::from("/env/override"));
    }

    #[test]
    fn test_env_override_invalid_timeout_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();

        std::env::set_var("CSTORE_UPDATE_TIMEOUT_SECS", "not_a_number");
        config.apply_env_overrides();
        std::env::remove_var("CSTORE_UPDATE_TIMEOUT_SECS");

        assert_eq!(config.publish.update_timeout_secs, 300);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result: Result<Config, _> = toml::from_str("invalid { toml }");
        assert!(result.is_err());
    }
}
