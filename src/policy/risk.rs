//! Consecutive-loss protection
//!
//! Tracks the win/loss streak of every strategy from realized batch
//! earnings. A strategy whose losing streak reaches the limit is throttled;
//! its next winning batch resets the streak and lifts the throttle.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::error::{OmsError, Result};
use crate::handler::{ModuleKind, ModuleStatus, PolicyDecision, PolicyHandler};
use crate::types::EarningInfo;

/// Configuration for LossStreakRisk using builder pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossStreakRiskConfig {
    pub consecutive_loss_limit: usize,
    /// Count only batches the risk module approved
    pub require_risk_pass: bool,
}

impl Default for LossStreakRiskConfig {
    fn default() -> Self {
        Self {
            consecutive_loss_limit: 3,
            require_risk_pass: false,
        }
    }
}

impl LossStreakRiskConfig {
    /// Set consecutive loss protection
    pub fn with_consecutive_loss_limit(mut self, limit: usize) -> Self {
        self.consecutive_loss_limit = limit;
        self
    }

    pub fn with_require_risk_pass(mut self, require: bool) -> Self {
        self.require_risk_pass = require;
        self
    }

    /// Build the LossStreakRisk module
    pub fn build(self, name: impl Into<String>) -> LossStreakRisk {
        LossStreakRisk::from_config(name, self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Streaks {
    consecutive_losses: BTreeMap<String, usize>,
    consecutive_wins: BTreeMap<String, usize>,
    throttled: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct LossStreakRisk {
    name: String,
    config: LossStreakRiskConfig,
    streaks: Streaks,
}

impl LossStreakRisk {
    pub fn from_config(name: impl Into<String>, config: LossStreakRiskConfig) -> Self {
        Self {
            name: name.into(),
            config,
            streaks: Streaks::default(),
        }
    }

    pub fn consecutive_losses(&self, strategy_id: &str) -> usize {
        self.streaks
            .consecutive_losses
            .get(strategy_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn consecutive_wins(&self, strategy_id: &str) -> usize {
        self.streaks
            .consecutive_wins
            .get(strategy_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_throttled(&self, strategy_id: &str) -> bool {
        self.streaks.throttled.contains(strategy_id)
    }

    /// Record a winning batch
    pub fn record_win(&mut self, strategy_id: &str) {
        *self
            .streaks
            .consecutive_wins
            .entry(strategy_id.to_string())
            .or_insert(0) += 1;
        self.streaks
            .consecutive_losses
            .insert(strategy_id.to_string(), 0);
        if self.streaks.throttled.remove(strategy_id) {
            info!("{}: {} back after a winning batch", self.name, strategy_id);
        }
    }

    /// Record a losing batch
    pub fn record_loss(&mut self, strategy_id: &str) {
        let losses = self
            .streaks
            .consecutive_losses
            .entry(strategy_id.to_string())
            .or_insert(0);
        *losses += 1;
        let losses = *losses;
        self.streaks
            .consecutive_wins
            .insert(strategy_id.to_string(), 0);
        if losses >= self.config.consecutive_loss_limit
            && self.streaks.throttled.insert(strategy_id.to_string())
        {
            warn!(
                "{}: {} throttled after {} consecutive losses",
                self.name, strategy_id, losses
            );
        }
    }

    fn throttle_list(&self) -> Vec<String> {
        self.streaks.throttled.iter().cloned().collect()
    }
}

impl ModuleStatus for LossStreakRisk {
    fn get_module_status(&self) -> serde_json::Value {
        serde_json::json!({
            "config": self.config,
            "consecutive_losses": self.streaks.consecutive_losses,
            "consecutive_wins": self.streaks.consecutive_wins,
            "throttled": self.streaks.throttled,
        })
    }

    fn set_module_status(&mut self, status: serde_json::Value) -> Result<()> {
        let config = status
            .get("config")
            .cloned()
            .ok_or_else(|| OmsError::ModuleStatus(format!("{}: missing config", self.name)))?;
        let config: LossStreakRiskConfig = serde_json::from_value(config)
            .map_err(|e| OmsError::ModuleStatus(format!("{}: {}", self.name, e)))?;
        let streaks: Streaks = serde_json::from_value(status)
            .map_err(|e| OmsError::ModuleStatus(format!("{}: {}", self.name, e)))?;
        self.config = config;
        self.streaks = streaks;
        Ok(())
    }
}

impl PolicyHandler for LossStreakRisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Risk
    }

    fn on_earning(&mut self, earning: &EarningInfo) -> Option<PolicyDecision> {
        if self.config.require_risk_pass && !earning.risk_pass {
            return None;
        }
        let before = self.streaks.throttled.clone();
        if earning.is_win() {
            self.record_win(&earning.strategy_id);
        } else {
            self.record_loss(&earning.strategy_id);
        }
        (self.streaks.throttled != before).then(|| PolicyDecision::Throttle(self.throttle_list()))
    }
}
