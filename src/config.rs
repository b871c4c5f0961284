//! Configuration management for the coin-flip engine
//!
//! TOML file, then environment overrides, then validation.

use crate::errors::{ConfigurationError, EngineResult};
use crate::FEE_BPS_MAX;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoinFlipConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Wagering parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fee used by the CLI when `init` is called without `--fee-bps`
    pub default_fee_bps: u64,
    /// Max bet used by the CLI when `init` is called without `--max-bet`
    pub default_max_bet: u64,
    /// Seconds a bet must stay unfulfilled before its owner may refund it
    pub bet_expiry_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_fee_bps: 400,
            default_max_bet: 2_000_000_000,
            bet_expiry_secs: 3_600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

/// Storage configuration with optimization settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/coinflip_ledger".to_string(),
            write_buffer_size_mb: 64,
            clear_on_start: false,
        }
    }
}

/// Settings of the simulated randomness oracle network
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Fee charged to the bettor per randomness request
    pub request_fee: u64,
    /// Name the treasury address is derived from
    pub treasury_label: String,
    /// Fulfill requests right after placement (simulation only)
    pub auto_fulfill: bool,
    /// Phrase the oracle's VRF key is derived from
    pub signing_seed: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            request_fee: 5_000,
            treasury_label: "oracle-treasury".to_string(),
            auto_fulfill: false,
            signing_seed: "local-oracle".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
    pub event_channel_capacity: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            event_channel_capacity: 1_024,
        }
    }
}

impl CoinFlipConfig {
    /// In-memory ledger with an auto-fulfilling oracle, used by `simulate` and tests
    pub fn simulation() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            oracle: OracleConfig {
                auto_fulfill: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<CoinFlipConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => CoinFlipConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<CoinFlipConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into()
        })
    }

    fn apply_env_overrides(&self, config: &mut CoinFlipConfig) -> EngineResult<()> {
        if let Ok(data_dir) = env::var("COINFLIP_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }
        if let Ok(backend) = env::var("COINFLIP_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        field: "COINFLIP_STORAGE_BACKEND".to_string(),
                        value: backend,
                        reason: "Expected 'memory' or 'rocksdb'".to_string(),
                    }
                    .into())
                }
            };
        }
        if let Ok(expiry) = env::var("COINFLIP_BET_EXPIRY_SECS") {
            config.engine.bet_expiry_secs =
                expiry.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "COINFLIP_BET_EXPIRY_SECS".to_string(),
                    value: expiry,
                    reason: "Invalid number of seconds".to_string(),
                })?;
        }
        if let Ok(fee) = env::var("COINFLIP_ORACLE_FEE") {
            config.oracle.request_fee =
                fee.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "COINFLIP_ORACLE_FEE".to_string(),
                    value: fee,
                    reason: "Invalid fee amount".to_string(),
                })?;
        }
        if let Ok(level) = env::var("COINFLIP_LOG_LEVEL") {
            config.monitoring.log_level =
                level.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "COINFLIP_LOG_LEVEL".to_string(),
                    value: level,
                    reason: "Expected error, warn, info, debug or trace".to_string(),
                })?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &CoinFlipConfig) -> EngineResult<()> {
        if config.engine.default_fee_bps > FEE_BPS_MAX {
            return Err(ConfigurationError::InvalidValue {
                field: "engine.default_fee_bps".to_string(),
                value: config.engine.default_fee_bps.to_string(),
                reason: format!("Fee cannot exceed {} bps", FEE_BPS_MAX),
            }
            .into());
        }

        if config.engine.default_max_bet == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "engine.default_max_bet".to_string(),
                value: "0".to_string(),
                reason: "Max bet cannot be zero".to_string(),
            }
            .into());
        }

        if config.engine.bet_expiry_secs <= 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "engine.bet_expiry_secs".to_string(),
                value: config.engine.bet_expiry_secs.to_string(),
                reason: "Expiry must be positive".to_string(),
            }
            .into());
        }

        if config.storage.backend == StorageBackend::RocksDb
            && config.storage.data_directory.is_empty()
        {
            return Err(
                ConfigurationError::MissingRequired("storage.data_directory".to_string()).into(),
            );
        }

        if config.oracle.treasury_label.is_empty() {
            return Err(
                ConfigurationError::MissingRequired("oracle.treasury_label".to_string()).into(),
            );
        }

        if config.monitoring.event_channel_capacity == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "monitoring.event_channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "Channel capacity cannot be zero".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &CoinFlipConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into()
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> EngineResult<()> {
    ConfigLoader::new().save(&CoinFlipConfig::default(), path)
}
