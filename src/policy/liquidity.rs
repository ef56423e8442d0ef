//! Filled-exposure liquidity control
//!
//! Accumulates signed filled amount per symbol from order updates and
//! scales new sizing down linearly as exposure approaches the cap:
//!
//! ```text
//! multiplier = clamp(1 - |exposure| / max_exposure, floor, 1)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{OmsError, Result};
use crate::handler::{ModuleKind, ModuleStatus, PolicyDecision, PolicyHandler};
use crate::oms::{Order, OrderId};
use crate::types::Symbol;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillExposureConfig {
    /// Absolute filled amount at which sizing reaches `floor`
    pub max_exposure: f64,
    pub floor: f64,
}

impl Default for FillExposureConfig {
    fn default() -> Self {
        Self {
            max_exposure: 10.0,
            floor: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Exposure {
    exposure: BTreeMap<Symbol, f64>,
    /// Executed amount already counted for each live order
    counted: BTreeMap<OrderId, f64>,
}

#[derive(Debug, Clone)]
pub struct FillExposureLiquidity {
    name: String,
    config: FillExposureConfig,
    state: Exposure,
}

impl FillExposureLiquidity {
    pub fn new(name: impl Into<String>, config: FillExposureConfig) -> Result<Self> {
        if !(config.max_exposure > 0.0) || !(0.0..=1.0).contains(&config.floor) {
            return Err(OmsError::Validation(format!(
                "invalid liquidity config: max_exposure={}, floor={}",
                config.max_exposure, config.floor
            )));
        }
        Ok(Self {
            name: name.into(),
            config,
            state: Exposure::default(),
        })
    }

    pub fn exposure(&self, symbol: &Symbol) -> f64 {
        self.state.exposure.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn multiplier(&self, symbol: &Symbol) -> f64 {
        let used = self.exposure(symbol).abs() / self.config.max_exposure;
        (1.0 - used).clamp(self.config.floor, 1.0)
    }
}

impl ModuleStatus for FillExposureLiquidity {
    fn get_module_status(&self) -> serde_json::Value {
        serde_json::json!({
            "config": self.config,
            "exposure": self.state.exposure,
            "counted": self.state.counted,
        })
    }

    fn set_module_status(&mut self, status: serde_json::Value) -> Result<()> {
        let invalid = |e: serde_json::Error| OmsError::ModuleStatus(format!("{}: {}", self.name, e));
        let config: FillExposureConfig = status
            .get("config")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(invalid)?
            .ok_or_else(|| OmsError::ModuleStatus(format!("{}: missing config", self.name)))?;
        let state: Exposure = serde_json::from_value(status).map_err(invalid)?;
        self.config = config;
        self.state = state;
        Ok(())
    }
}

impl PolicyHandler for FillExposureLiquidity {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Liquidity
    }

    fn on_order(&mut self, order: &Order) -> Option<PolicyDecision> {
        let counted = self
            .state
            .counted
            .get(&order.order_id)
            .copied()
            .unwrap_or(0.0);
        let delta = order.execute_amount - counted;

        if order.is_terminal() {
            self.state.counted.remove(&order.order_id);
        } else if delta > 0.0 {
            self.state
                .counted
                .insert(order.order_id.clone(), order.execute_amount);
        }
        if delta <= 0.0 {
            return None;
        }

        let exposure = self
            .state
            .exposure
            .entry(order.symbol.clone())
            .or_insert(0.0);
        *exposure += f64::from(order.direction) * delta;
        debug!(
            "{}: {} exposure now {:.6}",
            self.name, order.symbol, *exposure
        );

        let mut multipliers = HashMap::new();
        multipliers.insert(order.symbol.clone(), self.multiplier(&order.symbol));
        Some(PolicyDecision::Adjust(multipliers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oms::{OrderRequest, UpdateOrderInfo, OrderRegistry};
    use crate::types::{Action, OrderStatus, PositionSide};
    use approx::assert_relative_eq;

    const SYMBOL: &str = "btc_usdt|binance_future";

    fn liquidity() -> FillExposureLiquidity {
        FillExposureLiquidity::new(
            "exposure",
            FillExposureConfig {
                max_exposure: 4.0,
                floor: 0.1,
            },
        )
        .unwrap()
    }

    fn registry_with(position: PositionSide) -> (OrderRegistry, OrderId) {
        let mut registry = OrderRegistry::new();
        let order = Order::from_request(
            "o-1".to_string(),
            OrderRequest::market("b", SYMBOL, Action::Open, position, 2.0),
            1.0,
        )
        .unwrap();
        registry.insert(order);
        (registry, "o-1".to_string())
    }

    fn fill(registry: &mut OrderRegistry, id: &str, status: OrderStatus, amount: f64) -> Order {
        registry
            .apply_update(id, &UpdateOrderInfo::new(status, 2.0, 2.0).with_execution(100.0, amount))
            .unwrap()
    }

    #[test]
    fn test_partial_fills_counted_once() {
        let mut liquidity = liquidity();
        let (mut registry, id) = registry_with(PositionSide::Long);
        let symbol = Symbol::new(SYMBOL);

        let partial = fill(&mut registry, &id, OrderStatus::PartialFilled, 0.5);
        assert!(liquidity.on_order(&partial).is_some());
        // same snapshot delivered twice adds nothing
        assert!(liquidity.on_order(&partial).is_none());

        let done = fill(&mut registry, &id, OrderStatus::Filled, 2.0);
        let decision = liquidity.on_order(&done).unwrap();
        assert_relative_eq!(liquidity.exposure(&symbol), 2.0);
        match decision {
            PolicyDecision::Adjust(m) => assert_relative_eq!(m[&symbol], 0.5),
            other => panic!("unexpected {:?}", other),
        }
        assert!(liquidity.state.counted.is_empty());
    }

    #[test]
    fn test_short_fills_reduce_exposure_and_floor_applies() {
        let mut liquidity = liquidity();
        let symbol = Symbol::new(SYMBOL);

        let (mut registry, id) = registry_with(PositionSide::Short);
        let done = fill(&mut registry, &id, OrderStatus::Filled, 2.0);
        liquidity.on_order(&done);
        assert_relative_eq!(liquidity.exposure(&symbol), -2.0);

        for n in 0..3 {
            let mut registry = OrderRegistry::new();
            let id = format!("short-{}", n);
            registry.insert(
                Order::from_request(
                    id.clone(),
                    OrderRequest::market("b", SYMBOL, Action::Open, PositionSide::Short, 2.0),
                    1.0,
                )
                .unwrap(),
            );
            let done = fill(&mut registry, &id, OrderStatus::Filled, 2.0);
            liquidity.on_order(&done);
        }
        assert_relative_eq!(liquidity.multiplier(&symbol), 0.1);
    }

    #[test]
    fn test_cancel_without_fill_is_ignored() {
        let mut liquidity = liquidity();
        let (mut registry, id) = registry_with(PositionSide::Long);
        let canceled = registry
            .apply_update(&id, &UpdateOrderInfo::new(OrderStatus::Canceled, 2.0, 2.0))
            .unwrap();
        assert!(liquidity.on_order(&canceled).is_none());
    }

    #[test]
    fn test_module_status_round_trip() {
        let mut liquidity = liquidity();
        let (mut registry, id) = registry_with(PositionSide::Long);
        let partial = fill(&mut registry, &id, OrderStatus::PartialFilled, 1.0);
        liquidity.on_order(&partial);

        let status = liquidity.get_module_status();
        let mut restored = FillExposureLiquidity::new("exposure", FillExposureConfig::default()).unwrap();
        restored.set_module_status(status.clone()).unwrap();
        assert_eq!(restored.get_module_status(), status);
        assert_eq!(restored.config.max_exposure, 4.0);
    }

    fn fractional_order(registry: &mut OrderRegistry, id: &str, position: PositionSide) {
        registry.insert(
            Order::from_request(
                id.to_string(),
                OrderRequest::market("b", SYMBOL, Action::Open, position, 1.0),
                1.0,
            )
            .unwrap(),
        );
    }

    #[test]
    fn test_text_checkpoint_keeps_later_decisions() {
        let mut liquidity = liquidity();
        let symbol = Symbol::new(SYMBOL);
        let mut registry = OrderRegistry::new();
        for (n, amount) in [0.1, 0.2, 1.0 / 3.0, 0.7 / 3.0].into_iter().enumerate() {
            let id = format!("frac-{}", n);
            fractional_order(&mut registry, &id, PositionSide::Long);
            liquidity.on_order(&fill(&mut registry, &id, OrderStatus::Filled, amount));
        }
        fractional_order(&mut registry, "live", PositionSide::Short);
        liquidity.on_order(&fill(&mut registry, "live", OrderStatus::PartialFilled, 0.1 / 3.0));

        let text = serde_json::to_string(&liquidity.get_module_status()).unwrap();
        let mut restored = FillExposureLiquidity::new("exposure", FillExposureConfig::default()).unwrap();
        restored
            .set_module_status(serde_json::from_str(&text).unwrap())
            .unwrap();
        assert_eq!(restored.exposure(&symbol).to_bits(), liquidity.exposure(&symbol).to_bits());
        assert_eq!(restored.state, liquidity.state);

        let next = fill(&mut registry, "live", OrderStatus::Filled, 0.7);
        assert_eq!(restored.on_order(&next), liquidity.on_order(&next));
        assert_eq!(restored.exposure(&symbol).to_bits(), liquidity.exposure(&symbol).to_bits());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(FillExposureLiquidity::new(
            "x",
            FillExposureConfig {
                max_exposure: 0.0,
                floor: 0.0
            }
        )
        .is_err());
    }
}
