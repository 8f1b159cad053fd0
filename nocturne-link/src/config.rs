//! Link configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via NOCTURNE_CONFIG)
//! 3. Environment variables

use nocturne_transfer::{ChecksumAlgorithm, ChunkEncoder, DEFAULT_COMPRESSION_LEVEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device identity advertised on the info channel.
    pub device: DeviceConfig,
    /// Lane capacities, pacing and retries.
    pub queue: QueueConfig,
    /// Backoff parameters.
    pub congestion: CongestionConfig,
    /// Bulk transfer settings.
    pub transfer: TransferConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("NOCTURNE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.device.apply_env_overrides();
        self.queue.apply_env_overrides();
        self.congestion.apply_env_overrides();
        self.transfer.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Rejects settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.congestion.validate()?;
        self.transfer.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Name reported on the info channel.
    pub name: String,
    /// Largest MTU this side accepts.
    pub max_mtu: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "Nocturne".to_string(),
            max_mtu: 517,
        }
    }
}

impl DeviceConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("NOCTURNE_DEVICE_NAME") {
            if !name.is_empty() {
                self.name = name;
            }
        }

        if let Ok(mtu) = std::env::var("NOCTURNE_MAX_MTU") {
            if let Ok(n) = mtu.parse() {
                self.max_mtu = n;
            }
        }
    }
}

/// Priority queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub urgent_capacity: usize,
    pub normal_capacity: usize,
    pub bulk_capacity: usize,
    /// Minimum gap after a bulk send in milliseconds (the chunk delay).
    pub bulk_interval_ms: u64,
    /// Minimum gap after a normal send in milliseconds.
    pub normal_interval_ms: u64,
    /// Per-send timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// Scheduler wake-up interval when every lane is empty.
    pub idle_tick_ms: u64,
    /// Retries for urgent messages.
    pub urgent_retries: u32,
    /// Retries for normal messages.
    pub normal_retries: u32,
    /// Extra retries for transfer start and end.
    pub critical_extra_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            urgent_capacity: 64,
            normal_capacity: 256,
            bulk_capacity: 1024,
            bulk_interval_ms: 8,
            normal_interval_ms: 2,
            send_timeout_ms: 1000,
            idle_tick_ms: 100,
            urgent_retries: 3,
            normal_retries: 0,
            critical_extra_retries: 1,
        }
    }
}

impl QueueConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(delay) = std::env::var("NOCTURNE_CHUNK_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.bulk_interval_ms = ms;
            }
        }

        if let Ok(timeout) = std::env::var("NOCTURNE_SEND_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.send_timeout_ms = ms;
            }
        }

        if let Ok(cap) = std::env::var("NOCTURNE_BULK_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.bulk_capacity = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.urgent_capacity == 0 || self.normal_capacity == 0 || self.bulk_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "lane capacities must be non-zero".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "send_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bulk_interval(&self) -> Duration {
        Duration::from_millis(self.bulk_interval_ms)
    }

    pub fn normal_interval(&self) -> Duration {
        Duration::from_millis(self.normal_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }
}

/// Congestion control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CongestionConfig {
    /// Backoff per consecutive failure in milliseconds.
    pub base_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

impl CongestionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(base) = std::env::var("NOCTURNE_BASE_BACKOFF_MS") {
            if let Ok(ms) = base.parse() {
                self.base_backoff_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("NOCTURNE_MAX_BACKOFF_MS") {
            if let Ok(ms) = max.parse() {
                self.max_backoff_ms = ms;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "max_backoff_ms ({}) is below base_backoff_ms ({})",
                self.max_backoff_ms, self.base_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Bulk transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Compress assets before chunking.
    pub compression: bool,
    /// zlib level (0-9).
    pub compression_level: u32,
    /// Digest over the transmitted bytes.
    pub checksum: ChecksumAlgorithm,
    /// Hard limit for one transfer in seconds.
    pub timeout_secs: u64,
    /// Chunks queued ahead of confirmed sends.
    pub max_in_flight_chunks: usize,
    /// How long to wait for peer feedback after the end message, in milliseconds.
    pub feedback_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            compression: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            checksum: ChecksumAlgorithm::Sha256,
            timeout_secs: 30,
            max_in_flight_chunks: 16,
            feedback_timeout_ms: 5000,
        }
    }
}

impl TransferConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("NOCTURNE_COMPRESSION") {
            self.compression = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Ok(level) = std::env::var("NOCTURNE_COMPRESSION_LEVEL") {
            if let Ok(n) = level.parse() {
                self.compression_level = n;
            }
        }

        if let Ok(algo) = std::env::var("NOCTURNE_CHECKSUM") {
            if let Some(parsed) = ChecksumAlgorithm::parse(&algo) {
                self.checksum = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("NOCTURNE_TRANSFER_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }

        if let Ok(window) = std::env::var("NOCTURNE_MAX_IN_FLIGHT") {
            if let Ok(n) = window.parse() {
                self.max_in_flight_chunks = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_level > 9 {
            return Err(ConfigError::ValidationError(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.max_in_flight_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "max_in_flight_chunks must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback_timeout_ms)
    }

    /// Builds the chunk encoder these settings describe.
    pub fn encoder(&self) -> ChunkEncoder {
        let level = self.compression.then_some(self.compression_level);
        ChunkEncoder::new(self.checksum, level)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Collect prometheus metrics.
    pub enabled: bool,
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("NOCTURNE_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
