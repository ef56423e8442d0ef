//! Orders, status updates, and the live-order table
//!
//! An order exists only while it is live: it is inserted as `pending`,
//! advanced by [`OrderRegistry::apply_update`] along the status rank, and
//! evicted the moment an accepted update makes it terminal (rank 5).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{OmsError, Result};
use crate::types::{
    direction, round_timestamp, Action, Feature, OrderStatus, OrderType,
    PositionSide, Symbol,
};

/// Order ID type - UUID v4 string generated at placement
pub type OrderId = String;

/// Generate a fresh order ID
pub fn next_order_id() -> OrderId {
    uuid::Uuid::new_v4().to_string()
}

/// Order placement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub batch_id: String,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub action: Action,
    pub position: PositionSide,
    pub amount: f64,
    pub feature: Option<Feature>,
    /// Seconds the exchange keeps the order alive
    pub expire: Option<f64>,
    /// Seconds the connector waits before sending
    pub delay: Option<f64>,
    /// Trigger price for condition orders
    pub condition: Option<f64>,
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn new(
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        order_type: OrderType,
        action: Action,
        position: PositionSide,
        amount: f64,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            symbol: symbol.into(),
            order_type,
            action,
            position,
            amount,
            feature: None,
            expire: None,
            delay: None,
            condition: None,
            price: None,
        }
    }

    /// Market order
    pub fn market(
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        action: Action,
        position: PositionSide,
        amount: f64,
    ) -> Self {
        Self::new(batch_id, symbol, OrderType::Market, action, position, amount)
    }

    /// Limit order at `price`
    pub fn limit(
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        action: Action,
        position: PositionSide,
        amount: f64,
        price: f64,
    ) -> Self {
        Self::new(batch_id, symbol, OrderType::Limit, action, position, amount).with_price(price)
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
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

    pub fn with_condition(mut self, condition: f64) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn direction(&self) -> i8 {
        direction(self.position, self.action)
    }

    /// Check the placement invariants.
    pub fn validate(&self) -> Result<()> {
        if self.order_type.requires_price()
            && self.price.is_none()
            && self.feature != Some(Feature::Queue)
        {
            return Err(OmsError::Validation(format!(
                "{:?} order on {} requires a price unless feature is queue",
                self.order_type, self.symbol
            )));
        }
        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(OmsError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        self.symbol.exchange()?;
        Ok(())
    }
}

/// Live order snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub batch_id: String,
    pub symbol: Symbol,
    pub exchange: String,
    pub order_type: OrderType,
    pub action: Action,
    pub position: PositionSide,
    /// +1 buys, -1 sells
    pub direction: i8,
    pub amount: f64,
    pub feature: Option<Feature>,
    pub expire: Option<f64>,
    pub delay: Option<f64>,
    pub condition: Option<f64>,
    pub price: Option<f64>,
    pub status: OrderStatus,

    /// Placement time from the connector clock
    pub current_timestamp: f64,
    pub send_timestamp: Option<f64>,
    pub receive_timestamp: Option<f64>,
    /// Exchange-reported time of the last accepted update
    pub last_timestamp: Option<f64>,
    /// Local receive time of the last accepted update
    pub local_timestamp: Option<f64>,
    pub trigger_timestamp: Option<f64>,
    pub trigger_local_timestamp: Option<f64>,

    pub execute_price: Option<f64>,
    pub execute_amount: f64,
    pub fee_rate: Option<f64>,
    pub msg: Option<serde_json::Value>,
}

impl Order {
    /// Create a pending order from a validated request.
    pub fn from_request(order_id: OrderId, request: OrderRequest, placed_at: f64) -> Result<Self> {
        request.validate()?;
        let exchange = request.symbol.exchange()?.to_string();
        let direction = request.direction();
        Ok(Self {
            order_id,
            batch_id: request.batch_id,
            symbol: request.symbol,
            exchange,
            order_type: request.order_type,
            action: request.action,
            position: request.position,
            direction,
            amount: request.amount,
            feature: request.feature,
            expire: request.expire,
            delay: request.delay,
            condition: request.condition,
            price: request.price,
            status: OrderStatus::Pending,
            current_timestamp: round_timestamp(placed_at),
            send_timestamp: None,
            receive_timestamp: None,
            last_timestamp: None,
            local_timestamp: None,
            trigger_timestamp: None,
            trigger_local_timestamp: None,
            execute_price: None,
            execute_amount: 0.0,
            fee_rate: None,
            msg: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Amount not yet executed
    pub fn remaining_amount(&self) -> f64 {
        (self.amount - self.execute_amount).max(0.0)
    }

    pub fn set_send_timestamp(&mut self, ts: f64) {
        self.send_timestamp = Some(round_timestamp(ts));
    }

    pub fn set_receive_timestamp(&mut self, ts: f64) {
        self.receive_timestamp = Some(round_timestamp(ts));
    }

    /// Whether `update` may overwrite the current state.
    pub fn accepts(&self, update: &UpdateOrderInfo) -> bool {
        let current = self.status.rank();
        let incoming = update.status.rank();
        if incoming < current {
            return false;
        }
        if incoming == current {
            return update.execute_amount.unwrap_or(0.0) > self.execute_amount;
        }
        true
    }

    fn apply(&mut self, update: &UpdateOrderInfo) {
        self.status = update.status;
        self.last_timestamp = Some(round_timestamp(update.last_timestamp));
        self.local_timestamp = Some(round_timestamp(update.local_timestamp));
        if update.status == OrderStatus::Triggered {
            self.trigger_timestamp = self.last_timestamp;
            self.trigger_local_timestamp = self.local_timestamp;
        }
        if let Some(price) = update.execute_price {
            self.execute_price = Some(price);
        }
        if let Some(amount) = update.execute_amount {
            self.execute_amount = amount;
        }
        if let Some(fee_rate) = update.fee_rate {
            self.fee_rate = Some(fee_rate);
        }
        if let Some(msg) = &update.msg {
            self.msg = Some(msg.clone());
        }
    }
}

/// Exchange-originated status delta for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOrderInfo {
    pub status: OrderStatus,
    pub last_timestamp: f64,
    pub local_timestamp: f64,
    #[serde(default)]
    pub execute_price: Option<f64>,
    /// Cumulative executed amount; `None` keeps the current value
    #[serde(default)]
    pub execute_amount: Option<f64>,
    #[serde(default)]
    pub fee_rate: Option<f64>,
    #[serde(default)]
    pub msg: Option<serde_json::Value>,
}

impl UpdateOrderInfo {
    pub fn new(status: OrderStatus, last_timestamp: f64, local_timestamp: f64) -> Self {
        Self {
            status,
            last_timestamp: round_timestamp(last_timestamp),
            local_timestamp: round_timestamp(local_timestamp),
            execute_price: None,
            execute_amount: None,
            fee_rate: None,
            msg: None,
        }
    }

    pub fn with_execution(mut self, price: f64, amount: f64) -> Self {
        self.execute_price = Some(price);
        self.execute_amount = Some(amount);
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    pub fn with_msg(mut self, msg: serde_json::Value) -> Self {
        self.msg = Some(msg);
        self
    }
}

/// Live-order table keyed by order ID
#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: HashMap<OrderId, Order>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: Order) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.orders.contains_key(order_id)
    }

    pub fn remove(&mut self, order_id: &str) -> Option<Order> {
        self.orders.remove(order_id)
    }

    /// Apply the monotonic update rule.
    ///
    /// Returns the post-update snapshot when the update is accepted. Unknown
    /// ids and stale updates are benign races and return `None`. A terminal
    /// update evicts the order; the returned snapshot is its final state.
    pub fn apply_update(&mut self, order_id: &str, update: &UpdateOrderInfo) -> Option<Order> {
        let Some(order) = self.orders.get_mut(order_id) else {
            debug!("Update for unknown order {} ignored", order_id);
            return None;
        };

        if !order.accepts(update) {
            debug!(
                "Stale update for {} ignored: {:?} -> {:?} (executed {} vs {:?})",
                order_id, order.status, update.status, order.execute_amount, update.execute_amount
            );
            return None;
        }

        order.apply(update);
        let snapshot = order.clone();
        if snapshot.is_terminal() {
            self.orders.remove(order_id);
            debug!("Order {} finalized as {:?}", order_id, snapshot.status);
        }
        Some(snapshot)
    }

    /// Record send/receive round-trip times for an order.
    pub fn update_round_timestamp(
        &mut self,
        order_id: &str,
        send_timestamp: Option<f64>,
        receive_timestamp: Option<f64>,
    ) -> bool {
        let Some(order) = self.orders.get_mut(order_id) else {
            return false;
        };
        if let Some(ts) = send_timestamp {
            order.set_send_timestamp(ts);
        }
        if let Some(ts) = receive_timestamp {
            order.set_receive_timestamp(ts);
        }
        true
    }

    /// Live orders belonging to one batch
    pub fn orders_in_batch(&self, batch_id: &str) -> Vec<&Order> {
        self.orders
            .values()
            .filter(|o| o.batch_id == batch_id)
            .collect()
    }

    pub fn get_all_orders(&self) -> Vec<&Order> {
        self.orders.values().collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
