use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::import::ImportRules;

/// The structure of our configuration file (config.toml)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of the download backend; the REST API lives under `/api`.
    pub server_url: String,
    pub poll_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    /// Seconds between `ping` frames on the live channel; 0 turns the heartbeat off.
    pub heartbeat_secs: u64,
    pub default_resolution: String,
    pub watch_marker: String,
    pub watch_path_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        let rules = ImportRules::default();
        Config {
            server_url: "http://127.0.0.1:9191".to_string(),
            poll_interval_secs: 5,
            reconnect_delay_secs: 3,
            heartbeat_secs: 15,
            default_resolution: "1080p".to_string(),
            watch_marker: rules.marker,
            watch_path_prefix: rules.path_prefix,
        }
    }
}

impl Config {
    /// Zero is accepted here; the poller raises it to its one-second floor.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }

    /// A connection is presumed dead after three heartbeats without any reply.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.heartbeat().map(|every| every * 3)
    }

    pub fn import_rules(&self) -> ImportRules {
        ImportRules {
            marker: self.watch_marker.clone(),
            path_prefix: self.watch_path_prefix.clone(),
        }
    }
}

/// Returns the cross-platform path to the configuration file, creating the directory if needed.
pub async fn get_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "dl-client", "DL-Client")
        .ok_or_else(|| anyhow!("Could not find a valid home directory to store config"))?;

    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir).await?;

    Ok(config_dir.join("config.toml"))
}

/// Loads the configuration from the default location, creating it on first use.
pub async fn load_config() -> Result<Config> {
    load_config_from(&get_config_path().await?).await
}

/// Loads the configuration from `config_path`, or creates a default one if it doesn't exist.
pub async fn load_config_from(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::info!(
            "No config file found. Creating a default one at: {}",
            config_path.display()
        );
        let default_config = Config::default();
        save_config_to(config_path, &default_config).await?;
        return Ok(default_config);
    }

    let config_content = fs::read_to_string(config_path).await?;
    let config: Config = toml::from_str(&config_content)
        .map_err(|e| anyhow!("Failed to parse config file at {}: {}", config_path.display(), e))?;

    Ok(config)
}

/// Saves the provided configuration object to the default location.
pub async fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path().await?, config).await
}

pub async fn save_config_to(config_path: &Path, config: &Config) -> Result<()> {
    let toml_string = toml::to_string_pretty(config)?;
    fs::write(config_path, toml_string).await?;
    Ok(())
}
