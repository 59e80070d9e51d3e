//! # Configuration Management Module
//!
//! Loads and validates the TOML configuration of the monitor.
//!
//! ## Configuration Structure
//!
//! - [`MonitorConfig`] - queue sizing, heartbeat schedule, local node
//! - [`BatteryConfig`] - rapid drain window and threshold
//! - [`ChannelsConfig`] - channel names in radio index order, outgoing queue
//! - [`StorageConfig`] - data directory
//! - [`LoggingConfig`] - log level and optional log file
//! - `aliases` - friendly names for node ids, applied when a node is first seen
//!
//! ## Configuration File Format
//!
//! ```toml
//! [monitor]
//! name = "Mesh Watch"
//! queue_capacity = 256
//! heartbeat_interval_secs = 300
//! node_silence_minutes = 30
//!
//! [battery]
//! drain_window_minutes = 50
//! drain_threshold_percent = 15.0
//!
//! [channels]
//! names = ["primary", "alerts"]
//! outgoing_queue = 64
//! send_timeout_ms = 5000
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "meshwatch.log"
//!
//! [aliases]
//! "!433c1f6c" = "Garden"
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    /// Node id -> alias used when a node registers.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    /// Node id of the attached radio; excluded from silence checks.
    #[serde(default)]
    pub local_node_id: Option<String>,
    /// Capacity of the bounded event queue between sources and the evaluator.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds between silent-node sweeps (0 disables them).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_node_silence_minutes")]
    pub node_silence_minutes: u32,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

fn default_node_silence_minutes() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub drain_window_minutes: u32,
    pub drain_threshold_percent: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            drain_window_minutes: 50,
            drain_threshold_percent: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Channel names by radio index; `primary` always resolves to index 0.
    pub names: Vec<String>,
    #[serde(default = "default_outgoing_queue")]
    pub outgoing_queue: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_outgoing_queue() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    5000
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            names: vec!["primary".to_string()],
            outgoing_queue: default_outgoing_queue(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl StorageConfig {
    /// Directory of the sled database.
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("meshwatch")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.queue_capacity == 0 {
            bail!("monitor.queue_capacity must be at least 1");
        }
        if self.battery.drain_window_minutes == 0 {
            bail!("battery.drain_window_minutes must be at least 1");
        }
        if !(self.battery.drain_threshold_percent >= 0.0) {
            bail!(
                "battery.drain_threshold_percent must be a non-negative number (got {})",
                self.battery.drain_threshold_percent
            );
        }
        if self.channels.outgoing_queue == 0 {
            bail!("channels.outgoing_queue must be at least 1");
        }
        Ok(())
    }

    pub fn default_alias(&self, node_id: &str) -> String {
        alias_for(&self.aliases, node_id)
    }
}

/// Alias for a newly seen node: configured alias, else `Node <last four>`.
pub fn alias_for(aliases: &HashMap<String, String>, node_id: &str) -> String {
    aliases
        .get(node_id)
        .cloned()
        .unwrap_or_else(|| format!("Node {}", crate::logutil::short_node(node_id)))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            monitor: MonitorConfig {
                name: "Mesh Watch".to_string(),
                local_node_id: None,
                queue_capacity: default_queue_capacity(),
                heartbeat_interval_secs: default_heartbeat_interval_secs(),
                node_silence_minutes: default_node_silence_minutes(),
            },
            battery: BatteryConfig::default(),
            channels: ChannelsConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshwatch.log".to_string()),
            },
            aliases: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.monitor.queue_capacity, 256);
        assert_eq!(parsed.battery.drain_window_minutes, 50);
        assert_eq!(parsed.channels.names, vec!["primary".to_string()]);
        parsed.validate().unwrap();
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let text = r#"
            [monitor]
            name = "Test"

            [storage]
            data_dir = "/tmp/x"

            [logging]
            level = "debug"

            [aliases]
            "!433c1f6c" = "Garden"
        "#;
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.monitor.heartbeat_interval_secs, 300);
        assert_eq!(cfg.monitor.node_silence_minutes, 30);
        assert_eq!(cfg.battery.drain_threshold_percent, 15.0);
        assert_eq!(cfg.channels.send_timeout_ms, 5000);
        assert!(cfg.logging.file.is_none());
        assert_eq!(cfg.default_alias("!433c1f6c"), "Garden");
        assert_eq!(cfg.default_alias("!3bffe0"), "Node ffe0");
        assert_eq!(cfg.storage.store_path(), PathBuf::from("/tmp/x/meshwatch"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.monitor.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.battery.drain_window_minutes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.battery.drain_threshold_percent = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.battery.drain_threshold_percent = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let cfg = Config::load(path).await.unwrap();
        assert_eq!(cfg.monitor.name, "Mesh Watch");
    }
}
