//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the three service base URLs, where the bearer token is
//! kept, and the last used username.
//!
//! Configuration is stored at `~/.config/taskhub/config.json`. Environment
//! variables override the file after loading.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::client::{
    ServiceUrls, DEFAULT_TASK_SERVICE_URL, DEFAULT_TEAM_SERVICE_URL, DEFAULT_USER_SERVICE_URL,
};
use crate::auth::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "taskhub";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_USER_URL: &str = "TASKHUB_USER_URL";
const ENV_TEAM_URL: &str = "TASKHUB_TEAM_URL";
const ENV_TASK_URL: &str = "TASKHUB_TASK_URL";
const ENV_TOKEN_BACKEND: &str = "TASKHUB_TOKEN_BACKEND";

/// Where the bearer token is persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::str::FromStr for TokenBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(TokenBackend::File),
            "keyring" | "keychain" => Ok(TokenBackend::Keyring),
            "memory" => Ok(TokenBackend::Memory),
            other => Err(format!("Unknown token backend: {}", other)),
        }
    }
}

fn default_user_url() -> String {
    DEFAULT_USER_SERVICE_URL.to_string()
}

fn default_team_url() -> String {
    DEFAULT_TEAM_SERVICE_URL.to_string()
}

fn default_task_url() -> String {
    DEFAULT_TASK_SERVICE_URL.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_user_url")]
    pub user_service_url: String,
    #[serde(default = "default_team_url")]
    pub team_service_url: String,
    #[serde(default = "default_task_url")]
    pub task_service_url: String,
    #[serde(default)]
    pub token_backend: TokenBackend,
    #[serde(default)]
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_service_url: default_user_url(),
            team_service_url: default_team_url(),
            task_service_url: default_task_url(),
            token_backend: TokenBackend::default(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_USER_URL) {
            self.user_service_url = url;
        }
        if let Some(url) = lookup(ENV_TEAM_URL) {
            self.team_service_url = url;
        }
        if let Some(url) = lookup(ENV_TASK_URL) {
            self.task_service_url = url;
        }
        if let Some(backend) = lookup(ENV_TOKEN_BACKEND) {
            match backend.parse() {
                Ok(backend) => self.token_backend = backend,
                Err(e) => debug!(error = %e, "Ignoring token backend override"),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn service_urls(&self) -> ServiceUrls {
        ServiceUrls::new(
            &self.user_service_url,
            &self.team_service_url,
            &self.task_service_url,
        )
    }

    /// Build the token store selected by `token_backend`
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        let store: Arc<dyn TokenStore> = match self.token_backend {
            TokenBackend::File => Arc::new(FileTokenStore::new(self.data_dir()?)),
            TokenBackend::Keyring => Arc::new(KeyringTokenStore::new()),
            TokenBackend::Memory => Arc::new(MemoryTokenStore::new()),
        };
        debug!(backend = ?self.token_backend, "Token store configured");
        Ok(store)
    }
}
