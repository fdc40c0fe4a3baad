//! Configuration management for depcache

pub mod schema;

pub use schema::{CacheConfig, Config, EcosystemConfig, GeneralConfig};

use crate::error::{DepcacheError, DepcacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local config file
pub const LOCAL_CONFIG_FILE: &str = ".depcache.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depcache")
            .join("config.toml")
    }

    /// Walk up from `start` looking for a project-local config file
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> DepcacheResult<Config> {
        self.load_merged(None).await
    }

    /// Load the global config with an optional local config merged on top.
    ///
    /// Tables merge key by key; any other value in the local file replaces
    /// the global one (so a local `[[ecosystems]]` list replaces the defaults).
    pub async fn load_merged(&self, local: Option<&Path>) -> DepcacheResult<Config> {
        let mut merged = if fs::try_exists(&self.config_path).await.unwrap_or(false) {
            self.read_table(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            toml::Table::new()
        };

        if let Some(local) = local {
            debug!("Merging local config: {}", local.display());
            let overlay = self.read_table(local).await?;
            merge_tables(&mut merged, overlay);
        }

        let path = local.unwrap_or(&self.config_path);
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| DepcacheError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    async fn read_table(&self, path: &Path) -> DepcacheResult<toml::Table> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            DepcacheError::io(format!("reading config from {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| DepcacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> DepcacheResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            DepcacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> DepcacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DepcacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
