//! Configuration loading and persistence.
//!
//! Handles reading and writing the hostbridge configuration file. The
//! config directory can be overridden with `HOSTBRIDGE_CONFIG_DIR`, which
//! tests use to stay out of the real platform directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::constants::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_FRAMED_PORT};
use crate::transport::TransportMode;

/// Configuration for the hostbridge process.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Which transport carries commands.
    pub mode: TransportMode,
    /// Hub base URL for the WebSocket transport (scheme rewritten to ws/wss).
    pub base_url: String,
    /// RPC base URL for the HTTP transport.
    pub rpc_url: String,
    /// TCP port for the framed-socket listener (0 = OS-assigned).
    pub framed_port: u16,
    /// Root of the project this bridge serves.
    pub project_root: PathBuf,
    /// Per-command execution timeout in seconds.
    pub command_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            base_url: "http://127.0.0.1:8080".to_string(),
            rpc_url: "http://127.0.0.1:8090".to_string(),
            framed_port: DEFAULT_FRAMED_PORT,
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `HOSTBRIDGE_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (e.g. `~/.config/hostbridge`)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(explicit) = std::env::var("HOSTBRIDGE_CONFIG_DIR") {
            PathBuf::from(explicit)
        } else {
            dirs::config_dir()
                .context("could not determine config directory")?
                .join("hostbridge")
        };
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(dir)
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load the config file, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Persist the config file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let contents = serde_json::to_string_pretty(self).context("serializing config")?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
    }

    /// Per-command execution timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mode, TransportMode::Stdio);
        assert_eq!(config.framed_port, DEFAULT_FRAMED_PORT);
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"mode": "http-push", "base_url": "https://hub.test"}"#)
                .unwrap();
        assert_eq!(config.mode, TransportMode::HttpPush);
        assert_eq!(config.base_url, "https://hub.test");
        assert_eq!(config.framed_port, DEFAULT_FRAMED_PORT);
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config {
            mode: TransportMode::Http,
            rpc_url: "http://127.0.0.1:7777".into(),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, TransportMode::Http);
        assert_eq!(back.rpc_url, "http://127.0.0.1:7777");
    }
}
