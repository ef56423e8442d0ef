//! Conditional triggers ("sniffers") and their table
//!
//! Two kinds share one status lattice:
//! - target: fires once the price satisfies `price <op> target_price`
//! - trailing: arms at `target_price`, then fires when price retraces
//!   `back_pct` from the best excursion seen since arming
//!
//! Terminal rank is 2. A terminal sniffer is evicted unless its `drop`
//! flag is false, in which case it stays queryable until
//! [`SnifferRegistry::discard`] is called.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{OmsError, Result};
use crate::oms::order::OrderId;
use crate::types::{round_timestamp, Operator, SnifferStatus, Symbol};

/// Sniffer kind, serialized as `order_type`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "order_type", rename_all = "snake_case")]
pub enum SnifferKind {
    Target,
    Trailing {
        /// Retracement fraction from the best excursion, e.g. 0.01 = 1%
        back_pct: f64,
    },
}

/// Sniffer placement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnifferRequest {
    pub batch_id: String,
    pub symbol: Symbol,
    #[serde(flatten)]
    pub kind: SnifferKind,
    pub operator: Operator,
    pub target_price: f64,
    /// EMA smoothing factor applied to the watched price
    pub smooth: Option<f64>,
    pub expire: Option<f64>,
    pub delay: Option<f64>,
    #[serde(default = "default_drop")]
    pub drop: bool,
}

fn default_drop() -> bool {
    true
}

impl SnifferRequest {
    pub fn target(
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        operator: Operator,
        target_price: f64,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            symbol: symbol.into(),
            kind: SnifferKind::Target,
            operator,
            target_price,
            smooth: None,
            expire: None,
            delay: None,
            drop: true,
        }
    }

    pub fn trailing(
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        operator: Operator,
        target_price: f64,
        back_pct: f64,
    ) -> Self {
        Self {
            kind: SnifferKind::Trailing { back_pct },
            ..Self::target(batch_id, symbol, operator, target_price)
        }
    }

    pub fn with_smooth(mut self, smooth: f64) -> Self {
        self.smooth = Some(smooth);
        self
    }

    pub fn with_expire(mut self, expire: f64) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keep the sniffer in the table after it reaches a terminal status.
    pub fn retain_on_terminal(mut self) -> Self {
        self.drop = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_price.is_finite() && self.target_price > 0.0) {
            return Err(OmsError::Validation(format!(
                "target price must be positive, got {}",
                self.target_price
            )));
        }
        if let SnifferKind::Trailing { back_pct } = self.kind {
            if !(back_pct > 0.0 && back_pct < 1.0) {
                return Err(OmsError::Validation(format!(
                    "back_pct must be in (0, 1), got {}",
                    back_pct
                )));
            }
        }
        if let Some(smooth) = self.smooth {
            if !(smooth > 0.0 && smooth <= 1.0) {
                return Err(OmsError::Validation(format!(
                    "smooth must be in (0, 1], got {}",
                    smooth
                )));
            }
        }
        self.symbol.exchange()?;
        Ok(())
    }
}

/// Sniffer snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sniffer {
    pub order_id: OrderId,
    pub batch_id: String,
    pub symbol: Symbol,
    pub exchange: String,
    #[serde(flatten)]
    pub kind: SnifferKind,
    pub operator: Operator,
    pub target_price: f64,
    pub smooth: Option<f64>,
    pub expire: Option<f64>,
    pub delay: Option<f64>,
    pub status: SnifferStatus,
    pub last_timestamp: Option<f64>,
    pub local_timestamp: Option<f64>,
    pub drop: bool,
}

impl Sniffer {
    pub fn from_request(order_id: OrderId, request: SnifferRequest) -> Result<Self> {
        request.validate()?;
        let exchange = request.symbol.exchange()?.to_string();
        Ok(Self {
            order_id,
            batch_id: request.batch_id,
            symbol: request.symbol,
            exchange,
            kind: request.kind,
            operator: request.operator,
            target_price: request.target_price,
            smooth: request.smooth,
            expire: request.expire,
            delay: request.delay,
            status: SnifferStatus::Pending,
            last_timestamp: None,
            local_timestamp: None,
            drop: request.drop,
        })
    }

    pub fn is_trailing(&self) -> bool {
        matches!(self.kind, SnifferKind::Trailing { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Rank-only acceptance; a terminal sniffer keeps its final status.
    pub fn accepts(&self, update: &UpdateSnifferInfo) -> bool {
        !self.is_terminal() && update.status.rank() >= self.status.rank()
    }
}

/// Status delta for one sniffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSnifferInfo {
    pub status: SnifferStatus,
    pub last_timestamp: f64,
    pub local_timestamp: f64,
}

impl UpdateSnifferInfo {
    pub fn new(status: SnifferStatus, last_timestamp: f64, local_timestamp: f64) -> Self {
        Self {
            status,
            last_timestamp: round_timestamp(last_timestamp),
            local_timestamp: round_timestamp(local_timestamp),
        }
    }
}

/// Sniffer table keyed by order ID
#[derive(Debug, Default)]
pub struct SnifferRegistry {
    sniffers: HashMap<OrderId, Sniffer>,
}

impl SnifferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sniffer: Sniffer) {
        self.sniffers.insert(sniffer.order_id.clone(), sniffer);
    }

    pub fn get(&self, order_id: &str) -> Option<&Sniffer> {
        self.sniffers.get(order_id)
    }

    /// Explicitly remove a sniffer, typically one retained after termination.
    pub fn discard(&mut self, order_id: &str) -> Option<Sniffer> {
        self.sniffers.remove(order_id)
    }

    pub fn apply_update(&mut self, order_id: &str, update: &UpdateSnifferInfo) -> Option<Sniffer> {
        let Some(sniffer) = self.sniffers.get_mut(order_id) else {
            debug!("Update for unknown sniffer {} ignored", order_id);
            return None;
        };

        if !sniffer.accepts(update) {
            debug!(
                "Stale update for sniffer {} ignored: {:?} -> {:?}",
                order_id, sniffer.status, update.status
            );
            return None;
        }

        sniffer.status = update.status;
        sniffer.last_timestamp = Some(round_timestamp(update.last_timestamp));
        sniffer.local_timestamp = Some(round_timestamp(update.local_timestamp));

        let snapshot = sniffer.clone();
        if snapshot.is_terminal() && snapshot.drop {
            self.sniffers.remove(order_id);
            debug!("Sniffer {} finalized as {:?}", order_id, snapshot.status);
        }
        Some(snapshot)
    }

    /// Sniffers that reached a terminal status and are awaiting discard
    pub fn retained(&self) -> Vec<&Sniffer> {
        self.sniffers.values().filter(|s| s.is_terminal()).collect()
    }

    pub fn get_all_sniffers(&self) -> Vec<&Sniffer> {
        self.sniffers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.sniffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sniffers.is_empty()
    }
}
