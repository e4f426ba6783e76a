//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, where the session is stored, and the last used username.
//!
//! Configuration is stored at `~/.config/festpass/config.json`. The base URL
//! can be overridden with the `FESTPASS_API_BASE` environment variable (a
//! `.env` file works too, the binary loads it at startup).

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{FileStore, KeyringStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "festpass";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_BASE_ENV: &str = "FESTPASS_API_BASE";

/// Backend used when nothing is configured
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api";

/// Where tokens are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    /// `session.json` in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Nothing survives the process
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base: Option<String>,
    #[serde(default)]
    pub token_backend: TokenBackend,
    pub last_username: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Base URL: environment first, then the config file, then the local default.
    pub fn api_base(&self) -> String {
        Self::resolve_api_base(std::env::var(API_BASE_ENV).ok(), self.api_base.as_deref())
    }

    fn resolve_api_base(env: Option<String>, configured: Option<&str>) -> String {
        env.filter(|s| !s.trim().is_empty())
            .or_else(|| configured.map(str::to_string).filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string()
    }

    /// Open the configured token storage.
    pub fn token_store(&self) -> TokenStore {
        match self.token_backend {
            TokenBackend::File => {
                let dir = self.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
                debug!(?dir, "Using file token storage");
                TokenStore::new(FileStore::new(dir))
            }
            TokenBackend::Keyring => {
                debug!("Using keychain token storage");
                TokenStore::new(KeyringStore::new())
            }
            TokenBackend::Memory => TokenStore::in_memory(),
        }
    }
}
