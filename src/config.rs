//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `telemetry.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: bind address and port.
//!     - HistoryConfig: buffer capacity, snapshot cadence, replay window.
//!     - ObserversConfig: per-observer outbound queue depth.
//!     - StorageConfig: snapshot + alert config file locations.
//!     - LoggingConfig: log level and per-reading logging.
//!
//! ```text
//!     every section and field is optional; missing ones take the defaults.
//! ```
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::history::DEFAULT_CAPACITY;
use crate::observers::DEFAULT_QUEUE_DEPTH;
use crate::pipeline::{PipelineSettings, DEFAULT_PERSIST_EVERY, DEFAULT_REPLAY_WINDOW};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub history: HistoryConfig,
    pub observers: ObserversConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 5000 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub persist_every: u64,
    pub replay_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            persist_every: DEFAULT_PERSIST_EVERY,
            replay_window: DEFAULT_REPLAY_WINDOW,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ObserversConfig {
    pub queue_depth: usize,
}

impl Default for ObserversConfig {
    fn default() -> Self {
        Self { queue_depth: DEFAULT_QUEUE_DEPTH }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_file: PathBuf,
    pub alerts_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("iot_data.json"),
            alerts_file: PathBuf::from("alerts_config.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load with default fallback
    ///
    /// an explicit path is tried alone; otherwise the usual locations are
    /// searched. runs before logging is set up, hence println.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let paths = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![
                PathBuf::from("config").join("telemetry.toml"),
                PathBuf::from("..").join("config").join("telemetry.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: {:#}", e);
                    }
                }
            } else if explicit.is_some() {
                println!("[CONFIG] Warning: {} does not exist", path.display());
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            capacity: self.history.capacity,
            persist_every: self.history.persist_every,
            replay_window: self.history.replay_window,
            queue_depth: self.observers.queue_depth,
            log_readings: self.logging.show_sensor_data,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│         TELEMETRY HUB CONFIGURATION     │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Listen: {}", self.bind_addr());
        tracing::info!("│ History capacity: {}", self.history.capacity);
        tracing::info!("│ Snapshot every: {} readings", self.history.persist_every);
        tracing::info!("│ Observer queue depth: {}", self.observers.queue_depth);
        tracing::info!("│ Data file: {}", self.storage.data_file.display());
        tracing::info!("│ Alerts file: {}", self.storage.alerts_file.display());
        tracing::info!("│ Log level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}
