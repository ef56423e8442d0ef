//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides for deployment-specific values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::hub::DEFAULT_INBOUND_CAPACITY;
use crate::policy::{FillExposureConfig, LossStreakRiskConfig, PassRateConfig};
use crate::precision::PrecisionEngine;

/// Environment variable overriding `checkpoint.db_path`
pub const ENV_CHECKPOINT_DB: &str = "ALGO_OMS_CHECKPOINT_DB";
/// Environment variable overriding `hub.inbound_capacity`
pub const ENV_INBOUND_CAPACITY: &str = "ALGO_OMS_INBOUND_CAPACITY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Symbol -> decimal digits, registered before trading starts
    #[serde(default)]
    pub precision: BTreeMap<String, PrecisionConfig>,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub risk: LossStreakRiskConfig,
    #[serde(default)]
    pub liquidity: FillExposureConfig,
    #[serde(default)]
    pub optimizer: PassRateConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file is given
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_path) = std::env::var(ENV_CHECKPOINT_DB) {
            self.checkpoint.db_path = db_path;
        }
        if let Ok(capacity) = std::env::var(ENV_INBOUND_CAPACITY) {
            self.hub.inbound_capacity = capacity
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_INBOUND_CAPACITY))?;
        }
        Ok(())
    }

    /// Build the precision dictionary from the `precision` section
    pub fn precision_engine(&self) -> Result<PrecisionEngine> {
        let mut engine = PrecisionEngine::new();
        for (symbol, digits) in &self.precision {
            engine
                .register(symbol.as_str(), digits.price, digits.amount)
                .with_context(|| format!("Invalid precision for {}", symbol))?;
        }
        Ok(engine)
    }
}

/// Decimal digits for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionConfig {
    pub price: u32,
    pub amount: u32,
}

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Bounded inbound queue size; producers wait when it is full
    pub inbound_capacity: usize,
    /// Longest sleep of the timer driver between clock reads
    pub timer_poll_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            timer_poll_ms: 50,
        }
    }
}

impl HubConfig {
    pub fn timer_poll(&self) -> Duration {
        Duration::from_millis(self.timer_poll_ms.max(1))
    }
}

/// Module-status checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub db_path: String,
    pub json_backup_path: String,
    pub auto_backup: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            enabled: false,
            db_path: "state/module_state.db".to_string(),
            json_backup_path: "state/module_state.json".to_string(),
            auto_backup: true,
        }
    }
}

/// Paper connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub default_cash: f64,
    /// Start of a manual clock; wall clock when absent
    pub start_timestamp: Option<f64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            default_cash: 10_000.0,
            start_timestamp: None,
        }
    }
}
