//! TOML configuration file.
//!
//! ```toml
//! devices = "devices.json"
//! refresh_interval_seconds = 60
//! archive_dir = "archive"
//!
//! [web]
//! bind = "0.0.0.0:5055"
//!
//! [[servers]]
//! protocol = "tk103"
//! bind = "0.0.0.0:5002"
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::protocol;
use crate::registry::DeviceRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the JSON device list.
    #[serde(default = "default_devices")]
    pub devices: PathBuf,
    /// How often the device list is re-read from disk.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// Directory for daily position archives.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    pub bind: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5055".parse().expect("static address"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub protocol: String,
    pub bind: SocketAddr,
}

fn default_devices() -> PathBuf {
    PathBuf::from("devices.json")
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unknown protocol names up front instead of at listener start.
    fn validate(&self) -> Result<()> {
        let registry = std::sync::Arc::new(DeviceRegistry::new());
        for server in &self.servers {
            if protocol::create_decoder(&server.protocol, registry.clone()).is_none() {
                bail!("unknown protocol {:?} in [[servers]]", server.protocol);
            }
        }
        Ok(())
    }
}
