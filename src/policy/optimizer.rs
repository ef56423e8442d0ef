//! Pass-rate strategy selection
//!
//! Keeps a win tally per strategy. Once a strategy has at least
//! `min_samples` batches, it is deactivated while its pass rate sits below
//! `min_pass_rate` and reactivated when it recovers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::error::{OmsError, Result};
use crate::handler::{ModuleKind, ModuleStatus, PolicyDecision, PolicyHandler};
use crate::types::EarningInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassRateConfig {
    pub min_samples: usize,
    pub min_pass_rate: f64,
}

impl Default for PassRateConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            min_pass_rate: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub samples: usize,
    pub passes: usize,
}

impl Tally {
    pub fn pass_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.passes as f64 / self.samples as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassRateOptimizer {
    name: String,
    config: PassRateConfig,
    tallies: BTreeMap<String, Tally>,
    inactive: BTreeSet<String>,
}

impl PassRateOptimizer {
    pub fn new(name: impl Into<String>, config: PassRateConfig) -> Self {
        Self {
            name: name.into(),
            config,
            tallies: BTreeMap::new(),
            inactive: BTreeSet::new(),
        }
    }

    pub fn tally(&self, strategy_id: &str) -> Tally {
        self.tallies.get(strategy_id).copied().unwrap_or_default()
    }

    pub fn is_active(&self, strategy_id: &str) -> bool {
        !self.inactive.contains(strategy_id)
    }
}

impl ModuleStatus for PassRateOptimizer {
    fn get_module_status(&self) -> serde_json::Value {
        serde_json::json!({
            "config": self.config,
            "tallies": self.tallies,
            "inactive": self.inactive,
        })
    }

    fn set_module_status(&mut self, status: serde_json::Value) -> Result<()> {
        #[derive(Deserialize)]
        struct Snapshot {
            config: PassRateConfig,
            tallies: BTreeMap<String, Tally>,
            inactive: BTreeSet<String>,
        }
        let snapshot: Snapshot = serde_json::from_value(status)
            .map_err(|e| OmsError::ModuleStatus(format!("{}: {}", self.name, e)))?;
        self.config = snapshot.config;
        self.tallies = snapshot.tallies;
        self.inactive = snapshot.inactive;
        Ok(())
    }
}

impl PolicyHandler for PassRateOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Optimizer
    }

    fn on_earning(&mut self, earning: &EarningInfo) -> Option<PolicyDecision> {
        let tally = self
            .tallies
            .entry(earning.strategy_id.clone())
            .or_default();
        tally.samples += 1;
        if earning.is_win() {
            tally.passes += 1;
        }
        let tally = *tally;

        if tally.samples < self.config.min_samples {
            return None;
        }
        let rate = tally.pass_rate();
        let changed = if rate < self.config.min_pass_rate {
            self.inactive.insert(earning.strategy_id.clone())
        } else {
            self.inactive.remove(&earning.strategy_id)
        };
        if !changed {
            return None;
        }
        info!(
            "{}: {} {} at pass rate {:.2} over {} batches",
            self.name,
            earning.strategy_id,
            if self.is_active(&earning.strategy_id) { "reactivated" } else { "deactivated" },
            rate,
            tally.samples
        );
        Some(PolicyDecision::Throttle(self.inactive.iter().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn earning(strategy: &str, net: f64) -> EarningInfo {
        EarningInfo {
            batch_id: "b".to_string(),
            strategy_id: strategy.to_string(),
            start_timestamp: 0.0,
            open_timestamp: 0.0,
            close_timestamp: 0.0,
            earning: net,
            earning_net: net,
            optimizer_pass: true,
            risk_pass: true,
        }
    }

    fn optimizer() -> PassRateOptimizer {
        PassRateOptimizer::new(
            "pass_rate",
            PassRateConfig {
                min_samples: 4,
                min_pass_rate: 0.5,
            },
        )
    }

    #[test]
    fn test_no_decision_before_min_samples() {
        let mut opt = optimizer();
        for _ in 0..3 {
            assert!(opt.on_earning(&earning("s1", -1.0)).is_none());
        }
        assert!(opt.is_active("s1"));
    }

    #[test]
    fn test_deactivate_and_reactivate() {
        let mut opt = optimizer();
        opt.on_earning(&earning("s1", 1.0));
        opt.on_earning(&earning("s1", -1.0));
        opt.on_earning(&earning("s1", -1.0));
        let decision = opt.on_earning(&earning("s1", -1.0)).unwrap();
        assert_eq!(decision, PolicyDecision::Throttle(vec!["s1".to_string()]));
        assert_relative_eq!(opt.tally("s1").pass_rate(), 0.25);

        // 2/5 still below the floor
        assert!(opt.on_earning(&earning("s1", 1.0)).is_none());
        let decision = opt.on_earning(&earning("s1", 1.0)).unwrap();
        assert_eq!(decision, PolicyDecision::Throttle(vec![]));
        assert!(opt.is_active("s1"));
    }

    #[test]
    fn test_module_status_round_trip() {
        let mut opt = optimizer();
        for net in [1.0, -1.0, -1.0, -1.0] {
            opt.on_earning(&earning("s1", net));
        }
        opt.on_earning(&earning("s2", 1.0));

        let status = opt.get_module_status();
        let mut restored = PassRateOptimizer::new("pass_rate", PassRateConfig::default());
        restored.set_module_status(status.clone()).unwrap();
        assert_eq!(restored.get_module_status(), status);
        assert!(!restored.is_active("s1"));
        assert_eq!(restored.tally("s2"), Tally { samples: 1, passes: 1 });
    }

    #[test]
    fn test_text_checkpoint_keeps_later_decisions() {
        let mut opt = optimizer();
        for net in [0.1, -1.0 / 3.0, -0.2] {
            opt.on_earning(&earning("s1", net));
        }

        let text = serde_json::to_string(&opt.get_module_status()).unwrap();
        let mut restored = PassRateOptimizer::new("pass_rate", PassRateConfig::default());
        restored
            .set_module_status(serde_json::from_str(&text).unwrap())
            .unwrap();

        for net in [-0.7, 1.0 / 3.0, 0.1] {
            let next = earning("s1", net);
            assert_eq!(restored.on_earning(&next), opt.on_earning(&next));
        }
        assert_eq!(restored.tally("s1"), opt.tally("s1"));
    }

    #[test]
    fn test_malformed_status_rejected() {
        let mut opt = optimizer();
        let err = opt
            .set_module_status(serde_json::json!({"tallies": "nope"}))
            .unwrap_err();
        assert!(matches!(err, OmsError::ModuleStatus(_)));
    }
}
