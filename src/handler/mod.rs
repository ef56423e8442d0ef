//! Handler contracts for pipeline modules
//!
//! Strategy and execute modules implement the async [`StrategyHandler`];
//! they place and cancel through the [`OrderManager`] they were built with.
//! Optimizer, risk and liquidity modules implement the synchronous
//! [`PolicyHandler`] and answer events with an optional [`PolicyDecision`].

pub mod dispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::oms::{Order, OrderManager, Sniffer, TimerEvent};
use crate::types::{EarningInfo, Signal, Symbol};

pub use dispatcher::Dispatcher;

/// Pipeline stage a module belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Strategy,
    Execute,
    Optimizer,
    Risk,
    Liquidity,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::Strategy => "strategy",
            ModuleKind::Execute => "execute",
            ModuleKind::Optimizer => "optimizer",
            ModuleKind::Risk => "risk",
            ModuleKind::Liquidity => "liquidity",
        };
        write!(f, "{}", name)
    }
}

/// Output of a policy module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "value", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Strategy ids that must stop opening new batches
    Throttle(Vec<String>),
    /// Per-symbol sizing multipliers
    Adjust(HashMap<Symbol, f64>),
}

/// Serializable module state.
///
/// `set_module_status(get_module_status())` must restore an equivalent
/// module.
pub trait ModuleStatus {
    fn get_module_status(&self) -> Value;

    fn set_module_status(&mut self, status: Value) -> Result<()>;
}

#[async_trait]
pub trait StrategyHandler: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> ModuleKind {
        ModuleKind::Strategy
    }

    /// Order manager this handler trades through
    fn manager(&self) -> &Arc<OrderManager>;

    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_signal(&mut self, signal: &Signal) -> Result<()>;

    async fn on_order(&mut self, order: &Order) -> Result<()>;

    async fn on_sniffer(&mut self, sniffer: &Sniffer) -> Result<()>;

    async fn on_timer(&mut self, timer: &TimerEvent) -> Result<()>;

    /// Strategy ids a policy module asked to throttle
    async fn on_throttle(&mut self, _strategy_ids: &[String]) -> Result<()> {
        Ok(())
    }
}

pub trait PolicyHandler: ModuleStatus + Send {
    fn name(&self) -> &str;

    fn kind(&self) -> ModuleKind;

    fn on_timer(&mut self, _timer: &TimerEvent) -> Option<PolicyDecision> {
        None
    }

    fn on_order(&mut self, _order: &Order) -> Option<PolicyDecision> {
        None
    }

    fn on_sniffer(&mut self, _sniffer: &Sniffer) -> Option<PolicyDecision> {
        None
    }

    fn on_earning(&mut self, _earning: &EarningInfo) -> Option<PolicyDecision> {
        None
    }
}
