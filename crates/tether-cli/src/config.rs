//! Configuration management for the tether CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_rpc::rpc::ClientConfig;
use tether_rpc::ServerConfig;

pub const CONFIG_FILE: &str = "tether.toml";

/// Tether project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: RemoteConfig,
}

/// How CLI commands reach a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Open observing instead of regular sessions.
    #[serde(default)]
    pub observing: bool,
}

// Default value functions
fn default_address() -> String { "127.0.0.1:50000".to_string() }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_retry_attempts() -> u32 { 3 }

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            observing: false,
        }
    }
}

impl RemoteConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address
            .parse()
            .with_context(|| format!("Invalid server address: {}", self.address))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_attempts: self.retry_attempts,
            ..Default::default()
        }
    }
}

impl Config {
    /// Load config from tether.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

/// Find tether.toml in current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.server.port = 6000;
        config.client.observing = true;
        config.save(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[server]\nport = 7000\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.package_byte_size, 65536);
        assert_eq!(config.client, RemoteConfig::default());
    }

    #[test]
    fn test_client_settings() {
        let remote = RemoteConfig::default();
        assert_eq!(remote.socket_addr().unwrap().port(), 50000);
        assert_eq!(remote.client_config().retry_attempts, 3);

        let bad = RemoteConfig {
            address: "nowhere".into(),
            ..Default::default()
        };
        assert!(bad.socket_addr().is_err());
    }
}
