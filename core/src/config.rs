//! Configuration management
//!
//! File-based TOML configuration with environment variable overrides
//! and validation. Covers the run store location, the API server bind
//! address, and the clarification staleness threshold used by history
//! views.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Run store settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Unset means runs live in memory and are
    /// lost when the process exits.
    pub path: Option<PathBuf>,
}

/// API server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunbookConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Age in seconds after which a pending clarification is reported as
    /// stale in history views. Unset means suspended runs wait forever
    /// without comment; nothing ever auto-resolves either way.
    #[serde(default)]
    pub clarification_stale_after_secs: Option<u64>,
}

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
    config: RunbookConfig,
}

impl ConfigManager {
    /// Create a manager rooted at the platform config directory,
    /// loading the file if it exists and writing defaults if not.
    pub fn new() -> Result<Self> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        let config_path = config_dir.join("runbook").join("config.toml");
        Self::with_path(config_path)
    }

    /// Create a manager with a custom config file path.
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut manager = Self {
            config_path: path.as_ref().to_path_buf(),
            config: RunbookConfig::default(),
        };

        if manager.config_exists() {
            manager.load_config()?;
        } else {
            manager.save_config()?;
        }

        manager.apply_env_overrides();
        Ok(manager)
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file.
    pub fn load_config(&mut self) -> Result<()> {
        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            anyhow!(
                "Failed to read config file {:?}: {}",
                self.config_path,
                e
            )
        })?;
        self.config =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))?;
        info!("Loaded configuration from {:?}", self.config_path);
        Ok(())
    }

    /// Save configuration to file, creating parent directories as needed.
    pub fn save_config(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                anyhow!("Failed to create config directory {:?}: {}", parent, e)
            })?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
        fs::write(&self.config_path, content).map_err(|e| {
            anyhow!(
                "Failed to write config file {:?}: {}",
                self.config_path,
                e
            )
        })?;

        info!("Saved configuration to {:?}", self.config_path);
        Ok(())
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RUNBOOK_STORE_PATH") {
            self.config.store.path = Some(PathBuf::from(path));
            debug!("Applied env override for store path");
        }

        if let Ok(host) = std::env::var("RUNBOOK_API_HOST") {
            self.config.server.host = host;
            debug!("Applied env override for API host");
        }

        if let Ok(port_str) = std::env::var("RUNBOOK_API_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.config.server.port = port;
                debug!("Applied env override for API port");
            }
        }

        if let Ok(secs_str) = std::env::var("RUNBOOK_CLARIFICATION_STALE_AFTER_SECS") {
            if let Ok(secs) = secs_str.parse::<u64>() {
                self.config.clarification_stale_after_secs = Some(secs);
                debug!("Applied env override for clarification staleness");
            }
        }
    }

    pub fn get_config(&self) -> &RunbookConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut RunbookConfig {
        &mut self.config
    }

    /// Validate configuration.
    pub fn validate_config(&self) -> Result<()> {
        if self.config.server.host.is_empty() {
            return Err(anyhow!("Server host must not be empty"));
        }

        if self.config.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if let Some(path) = &self.config.store.path {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("Store path must not be empty when set"));
            }
        }

        if self.config.clarification_stale_after_secs == Some(0) {
            return Err(anyhow!(
                "Clarification staleness threshold must be greater than 0 when set"
            ));
        }

        Ok(())
    }

    /// Reset to default configuration.
    pub fn reset_to_defaults(&mut self) {
        self.config = RunbookConfig::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // Env overrides are process-global; tests that read or write them
    // serialize here.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = RunbookConfig::default();
        assert_eq!(config.store.path, None);
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.clarification_stale_after_secs, None);
    }

    #[test]
    fn test_config_save_load_round_trip() {
        let _env = ENV_LOCK.lock().unwrap();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut manager = ConfigManager::with_path(&config_path).unwrap();
        assert!(manager.config_exists());

        manager.get_config_mut().server.port = 9090;
        manager.get_config_mut().store.path = Some(PathBuf::from("/tmp/runs.db"));
        manager.get_config_mut().clarification_stale_after_secs = Some(3600);
        manager.save_config().unwrap();

        let reloaded = ConfigManager::with_path(&config_path).unwrap();
        assert_eq!(reloaded.get_config(), manager.get_config());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let _env = ENV_LOCK.lock().unwrap();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[server]\nport = 4000\n").unwrap();

        let manager = ConfigManager::with_path(&config_path).unwrap();
        let config = manager.get_config();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store.path, None);
    }

    #[test]
    fn test_env_overrides() {
        let _env = ENV_LOCK.lock().unwrap();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        std::env::set_var("RUNBOOK_STORE_PATH", "/tmp/override.db");
        std::env::set_var("RUNBOOK_API_PORT", "6001");
        std::env::set_var("RUNBOOK_CLARIFICATION_STALE_AFTER_SECS", "120");

        let manager = ConfigManager::with_path(&config_path).unwrap();

        std::env::remove_var("RUNBOOK_STORE_PATH");
        std::env::remove_var("RUNBOOK_API_PORT");
        std::env::remove_var("RUNBOOK_CLARIFICATION_STALE_AFTER_SECS");

        let config = manager.get_config();
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.server.port, 6001);
        assert_eq!(config.clarification_stale_after_secs, Some(120));
    }

    #[test]
    fn test_validation() {
        let _env = ENV_LOCK.lock().unwrap();
        let temp_dir = tempdir().unwrap();
        let mut manager =
            ConfigManager::with_path(temp_dir.path().join("config.toml")).unwrap();
        assert!(manager.validate_config().is_ok());

        manager.get_config_mut().server.port = 0;
        assert!(manager.validate_config().is_err());
        manager.reset_to_defaults();

        manager.get_config_mut().clarification_stale_after_secs = Some(0);
        assert!(manager.validate_config().is_err());
        manager.reset_to_defaults();
        assert!(manager.validate_config().is_ok());
    }
}
