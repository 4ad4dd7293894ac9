//! Protocol engine configuration
//!
//! Every field has a serde default, so an empty TOML document is a valid
//! configuration and yields the protocol's standard budgets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration shared by every node running the protocol engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub ota: OtaConfig,

    #[serde(default)]
    pub dtc: DtcConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.budget_divisor <= 0.0 {
            return Err(ConfigError::Invalid(
                "timing.budget_divisor must be positive".to_string(),
            ));
        }
        if self.security.seed_length == 0 {
            return Err(ConfigError::Invalid(
                "security.seed_length must be at least 1".to_string(),
            ));
        }
        let ota = &self.ota;
        if ota.download_area_start + ota.download_area_size > ota.install_area_start {
            return Err(ConfigError::Invalid(
                "ota.download_area overlaps ota.install_area".to_string(),
            ));
        }
        if ota.install_area_start + ota.install_area_size > ota.version_table {
            return Err(ConfigError::Invalid(
                "ota.install_area overlaps ota.version_table".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Timing
// =============================================================================

/// P2 / P2* response budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// P2 budget in protocol units
    #[serde(default = "default_p2_max")]
    pub p2_max: u16,

    /// P2* budget in protocol units
    #[serde(default = "default_p2_star_max")]
    pub p2_star_max: u16,

    /// Budget seconds = value / divisor
    #[serde(default = "default_budget_divisor")]
    pub budget_divisor: f64,

    /// Watchdog poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_p2_max() -> u16 {
    0x0028
}

fn default_p2_star_max() -> u16 {
    0x0190
}

fn default_budget_divisor() -> f64 {
    20.0
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            p2_max: default_p2_max(),
            p2_star_max: default_p2_star_max(),
            budget_divisor: default_budget_divisor(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Keep-alive window when a tester present requests Programming
    #[serde(default = "default_s3_timeout_secs")]
    pub s3_timeout_secs: u64,

    /// Inactivity countdown for any other non-default session
    #[serde(default = "default_non_default_timeout_secs")]
    pub non_default_timeout_secs: u64,
}

fn default_s3_timeout_secs() -> u64 {
    5
}

fn default_non_default_timeout_secs() -> u64 {
    365 * 24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            s3_timeout_secs: default_s3_timeout_secs(),
            non_default_timeout_secs: default_non_default_timeout_secs(),
        }
    }
}

// =============================================================================
// Security
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Wrong keys tolerated before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,

    #[serde(default = "default_seed_length")]
    pub seed_length: usize,
}

fn default_max_attempts() -> u8 {
    3
}

fn default_lockout_secs() -> u64 {
    10
}

fn default_seed_length() -> usize {
    4
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lockout_secs: default_lockout_secs(),
            seed_length: default_seed_length(),
        }
    }
}

// =============================================================================
// Liveness
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// A peripheral unseen for this long is marked down
    #[serde(default = "default_liveness_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// How often a peripheral announces itself
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_liveness_timeout_secs() -> u64 {
    120
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_liveness_timeout_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl LivenessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

// =============================================================================
// OTA partition layout
// =============================================================================

/// Layout of the backing-store partition used by firmware updates
///
/// ```text
/// 0x0000 ┌──────────────────┐
///        │  download area   │  RequestDownload / TransferData target
/// 0x8000 ├──────────────────┤
///        │  install area    │  verified image payload
/// 0xFFF0 ├──────────────────┤
///        │  version table   │  one byte per node (node % 0x10)
/// 0x10000└──────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    #[serde(default = "default_download_area_start")]
    pub download_area_start: u64,

    #[serde(default = "default_download_area_size")]
    pub download_area_size: u64,

    #[serde(default = "default_install_area_start")]
    pub install_area_start: u64,

    #[serde(default = "default_install_area_size")]
    pub install_area_size: u64,

    #[serde(default = "default_version_table")]
    pub version_table: u64,

    /// Largest block accepted by a single TransferData request
    #[serde(default = "default_max_block_length")]
    pub max_block_length: u16,
}

fn default_download_area_start() -> u64 {
    0x0000
}

fn default_download_area_size() -> u64 {
    0x8000
}

fn default_install_area_start() -> u64 {
    0x8000
}

fn default_install_area_size() -> u64 {
    0x7FF0
}

fn default_version_table() -> u64 {
    0xFFF0
}

fn default_max_block_length() -> u16 {
    0x0FFF
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            download_area_start: default_download_area_start(),
            download_area_size: default_download_area_size(),
            install_area_start: default_install_area_start(),
            install_area_size: default_install_area_size(),
            version_table: default_version_table(),
            max_block_length: default_max_block_length(),
        }
    }
}

impl OtaConfig {
    /// Total partition size the layout needs
    pub fn partition_size(&self) -> u64 {
        self.version_table + 0x10
    }
}

// =============================================================================
// DTC
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtcConfig {
    /// Status bits this node supports, applied to reported availability
    #[serde(default = "default_status_availability_mask")]
    pub status_availability_mask: u8,
}

fn default_status_availability_mask() -> u8 {
    0xFF
}

impl Default for DtcConfig {
    fn default() -> Self {
        Self {
            status_availability_mask: default_status_availability_mask(),
        }
    }
}
