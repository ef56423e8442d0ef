//! Order manager facade
//!
//! Owns the live order and sniffer tables, the frozen precision dictionary
//! and the timer driver, and forwards placement/cancellation to the
//! [`Connector`]. Table locks are only held for in-memory bookkeeping and
//! are always released before any connector call is awaited.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::error::{OmsError, Result};
use crate::oms::event::EventSender;
use crate::oms::order::{next_order_id, Order, OrderId, OrderRegistry, OrderRequest, UpdateOrderInfo};
use crate::oms::sniffer::{Sniffer, SnifferRegistry, SnifferRequest, UpdateSnifferInfo};
use crate::oms::timer::{TimerPayload, TimerService, DEFAULT_POLL_INTERVAL};
use crate::precision::PrecisionEngine;
use crate::types::{Operator, Symbol};

/// Bootstrap-time configuration for an [`OrderManager`]
pub struct OrderManagerBuilder {
    connector: Arc<dyn Connector>,
    events: EventSender,
    precision: PrecisionEngine,
    timer_poll: Duration,
}

impl OrderManagerBuilder {
    pub fn new(connector: Arc<dyn Connector>, events: EventSender) -> Self {
        Self {
            connector,
            events,
            precision: PrecisionEngine::new(),
            timer_poll: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Replace the precision dictionary wholesale
    pub fn with_precision(mut self, precision: PrecisionEngine) -> Self {
        self.precision = precision;
        self
    }

    pub fn register_precision(
        mut self,
        symbol: impl Into<Symbol>,
        price_digits: u32,
        amount_digits: u32,
    ) -> Result<Self> {
        self.precision
            .register(symbol, price_digits, amount_digits)?;
        Ok(self)
    }

    /// Infer digits for `symbol` from the connector's trades over the last
    /// `lookback_secs` seconds.
    pub async fn refresh_precision(mut self, symbol: impl Into<Symbol>, lookback_secs: f64) -> Result<Self> {
        let symbol = symbol.into();
        let end = self.connector.get_current_timestamp();
        let trades = self
            .connector
            .get_batch_price(&symbol, end - lookback_secs, end)
            .await?;
        let precision = self.precision.refresh_from_trades(symbol.clone(), &trades)?;
        info!(
            "Precision refreshed for {} from {} trades: price={} amount={}",
            symbol,
            trades.len(),
            precision.price,
            precision.amount
        );
        Ok(self)
    }

    pub fn with_timer_poll(mut self, poll: Duration) -> Self {
        self.timer_poll = poll;
        self
    }

    /// Freeze the precision dictionary and start the timer driver.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> OrderManager {
        let timers = TimerService::spawn(self.connector.clone(), self.events, self.timer_poll);
        info!(
            "Order manager started with precision for {} symbols",
            self.precision.len()
        );
        OrderManager {
            connector: self.connector,
            precision: self.precision,
            orders: Mutex::new(OrderRegistry::new()),
            sniffers: Mutex::new(SnifferRegistry::new()),
            timers,
        }
    }
}

pub struct OrderManager {
    connector: Arc<dyn Connector>,
    precision: PrecisionEngine,
    orders: Mutex<OrderRegistry>,
    sniffers: Mutex<SnifferRegistry>,
    timers: TimerService,
}

impl OrderManager {
    pub fn builder(connector: Arc<dyn Connector>, events: EventSender) -> OrderManagerBuilder {
        OrderManagerBuilder::new(connector, events)
    }

    pub fn precision(&self) -> &PrecisionEngine {
        &self.precision
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn get_current_timestamp(&self) -> f64 {
        self.connector.get_current_timestamp()
    }

    // ---------------------------------------------------------------------
    // Orders
    // ---------------------------------------------------------------------

    /// Validate, quantize, record and submit an order.
    ///
    /// Buy-direction prices are floored to the tick and sell-direction
    /// prices get floor plus one tick; amounts are floored. If the
    /// connector refuses the submission the order is dropped from the table
    /// and the error returned.
    pub async fn place_order(&self, request: OrderRequest) -> Result<OrderId> {
        request.validate()?;
        let request = self.quantize_request(request)?;
        let order = Order::from_request(next_order_id(), request, self.get_current_timestamp())?;
        let order_id = order.order_id.clone();

        self.orders.lock().await.insert(order.clone());
        debug!(
            "Order {} placed: {:?} {:?}/{:?} {} amount={} price={:?}",
            order_id, order.order_type, order.position, order.action, order.symbol, order.amount, order.price
        );

        if let Err(e) = self.connector.submit_order(&order).await {
            warn!("Order {} submission failed: {}", order_id, e);
            self.orders.lock().await.remove(&order_id);
            return Err(e);
        }

        let sent_at = self.get_current_timestamp();
        self.orders
            .lock()
            .await
            .update_round_timestamp(&order_id, Some(sent_at), None);
        Ok(order_id)
    }

    fn quantize_request(&self, mut request: OrderRequest) -> Result<OrderRequest> {
        let sell = request.direction() < 0;
        if let Some(price) = request.price {
            request.price = Some(self.precision.quantize_price(&request.symbol, price, sell)?);
        }
        if let Some(condition) = request.condition {
            request.condition =
                Some(self.precision.quantize_price(&request.symbol, condition, sell)?);
        }
        let amount = self
            .precision
            .quantize_amount(&request.symbol, request.amount, false)?;
        if amount <= 0.0 {
            return Err(OmsError::Validation(format!(
                "amount {} on {} rounds to zero",
                request.amount, request.symbol
            )));
        }
        request.amount = amount;
        Ok(request)
    }

    /// Request cancellation, now or after `delay` seconds.
    ///
    /// Local state is left untouched; the outcome arrives as a status update.
    pub async fn cancel_order(&self, order_id: &str, delay: Option<f64>) -> Result<()> {
        match delay {
            Some(delay) if delay > 0.0 => {
                let fire_at = self.get_current_timestamp() + delay;
                self.timers
                    .schedule(fire_at, TimerPayload::CancelOrder(order_id.to_string()))?;
                debug!("Cancel for order {} scheduled at {}", order_id, fire_at);
                Ok(())
            }
            _ => self.connector.cancel_order(order_id).await,
        }
    }

    pub async fn update_order_info(&self, order_id: &str, update: &UpdateOrderInfo) -> Option<Order> {
        self.orders.lock().await.apply_update(order_id, update)
    }

    pub async fn get_order(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().await.get(order_id).cloned()
    }

    pub async fn update_round_timestamp(
        &self,
        order_id: &str,
        send_timestamp: Option<f64>,
        receive_timestamp: Option<f64>,
    ) -> bool {
        self.orders
            .lock()
            .await
            .update_round_timestamp(order_id, send_timestamp, receive_timestamp)
    }

    pub async fn active_orders(&self) -> Vec<Order> {
        self.orders
            .lock()
            .await
            .get_all_orders()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn orders_in_batch(&self, batch_id: &str) -> Vec<Order> {
        self.orders
            .lock()
            .await
            .orders_in_batch(batch_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.lock().await.is_empty()
    }

    // ---------------------------------------------------------------------
    // Sniffers
    // ---------------------------------------------------------------------

    /// Record and submit a sniffer. The target price is floored to the tick.
    pub async fn place_sniffer(&self, mut request: SnifferRequest) -> Result<OrderId> {
        request.validate()?;
        request.target_price =
            self.precision
                .quantize_price(&request.symbol, request.target_price, false)?;
        let sniffer = Sniffer::from_request(next_order_id(), request)?;
        let order_id = sniffer.order_id.clone();

        self.sniffers.lock().await.insert(sniffer.clone());
        debug!(
            "Sniffer {} placed: {:?} {} {:?} {}",
            order_id, sniffer.kind, sniffer.symbol, sniffer.operator, sniffer.target_price
        );

        if let Err(e) = self.connector.submit_sniffer(&sniffer).await {
            warn!("Sniffer {} submission failed: {}", order_id, e);
            self.sniffers.lock().await.discard(&order_id);
            return Err(e);
        }
        Ok(order_id)
    }

    pub async fn place_target_sniffer(
        &self,
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        operator: Operator,
        target_price: f64,
        drop: bool,
    ) -> Result<OrderId> {
        let mut request = SnifferRequest::target(batch_id, symbol, operator, target_price);
        request.drop = drop;
        self.place_sniffer(request).await
    }

    pub async fn place_trailing_sniffer(
        &self,
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        operator: Operator,
        target_price: f64,
        back_pct: f64,
        drop: bool,
    ) -> Result<OrderId> {
        let mut request =
            SnifferRequest::trailing(batch_id, symbol, operator, target_price, back_pct);
        request.drop = drop;
        self.place_sniffer(request).await
    }

    pub async fn cancel_sniffer(&self, order_id: &str, delay: Option<f64>) -> Result<()> {
        match delay {
            Some(delay) if delay > 0.0 => {
                let fire_at = self.get_current_timestamp() + delay;
                self.timers
                    .schedule(fire_at, TimerPayload::CancelSniffer(order_id.to_string()))?;
                debug!("Cancel for sniffer {} scheduled at {}", order_id, fire_at);
                Ok(())
            }
            _ => self.connector.cancel_sniffer(order_id).await,
        }
    }

    pub async fn update_sniffer_info(
        &self,
        order_id: &str,
        update: &UpdateSnifferInfo,
    ) -> Option<Sniffer> {
        self.sniffers.lock().await.apply_update(order_id, update)
    }

    pub async fn get_sniffer(&self, order_id: &str) -> Option<Sniffer> {
        self.sniffers.lock().await.get(order_id).cloned()
    }

    /// Remove a sniffer kept after termination (`drop = false`).
    pub async fn discard_sniffer(&self, order_id: &str) -> Option<Sniffer> {
        self.sniffers.lock().await.discard(order_id)
    }

    pub async fn active_sniffers(&self) -> Vec<Sniffer> {
        self.sniffers
            .lock()
            .await
            .get_all_sniffers()
            .into_iter()
            .cloned()
            .collect()
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Deliver `event` to `on_timer` handlers at or after `fire_at`.
    pub fn place_timer(&self, fire_at: f64, event: Value) -> Result<()> {
        self.timers.place_timer(fire_at, event)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::PaperConnector;
    use crate::oms::event::{event_bus, EventReceiver, OmsEvent};
    use crate::types::{Action, Feature, OrderStatus, OrderType, PositionSide, SnifferStatus};
    use serde_json::json;

    const SYMBOL: &str = "btc_usdt|binance_future";

    fn manager() -> (Arc<PaperConnector>, OrderManager, EventReceiver) {
        let connector = Arc::new(PaperConnector::with_manual_clock(10_000.0, 1000.0));
        let (tx, rx) = event_bus();
        let manager = OrderManager::builder(connector.clone(), tx)
            .register_precision(SYMBOL, 2, 3)
            .unwrap()
            .with_timer_poll(Duration::from_millis(5))
            .build();
        (connector, manager, rx)
    }

    #[tokio::test]
    async fn test_place_order_quantizes_by_direction() {
        let (connector, manager, _rx) = manager();

        let buy = manager
            .place_order(OrderRequest::limit("b1", SYMBOL, Action::Open, PositionSide::Long, 0.12345, 100.127))
            .await
            .unwrap();
        let sell = manager
            .place_order(OrderRequest::limit("b1", SYMBOL, Action::Open, PositionSide::Short, 0.12345, 100.127))
            .await
            .unwrap();

        let buy = manager.get_order(&buy).await.unwrap();
        assert_eq!(buy.price, Some(100.12));
        assert_eq!(buy.amount, 0.123);
        assert_eq!(buy.status, OrderStatus::Pending);
        assert_eq!(buy.current_timestamp, 1000.0);
        assert_eq!(buy.send_timestamp, Some(1000.0));

        let sell = manager.get_order(&sell).await.unwrap();
        assert_eq!(sell.price, Some(100.13));
        assert_eq!(sell.direction, -1);

        assert_eq!(connector.journal().await.orders.len(), 2);
    }

    #[tokio::test]
    async fn test_place_order_validation() {
        let (connector, manager, _rx) = manager();

        let missing_price =
            OrderRequest::new("b", SYMBOL, OrderType::Limit, Action::Open, PositionSide::Long, 1.0);
        assert!(matches!(
            manager.place_order(missing_price.clone()).await,
            Err(OmsError::Validation(_))
        ));
        assert!(manager
            .place_order(missing_price.with_feature(Feature::Queue))
            .await
            .is_ok());

        let unknown = OrderRequest::market("b", "eth_usdt|binance_future", Action::Open, PositionSide::Long, 1.0);
        assert!(matches!(
            manager.place_order(unknown).await,
            Err(OmsError::MissingPrecision(_))
        ));

        let dust = OrderRequest::market("b", SYMBOL, Action::Open, PositionSide::Long, 0.0001);
        assert!(manager.place_order(dust).await.is_err());
        assert_eq!(connector.journal().await.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_submission_is_not_tracked() {
        let (connector, manager, _rx) = manager();
        connector.set_reject_orders(true);
        let result = manager
            .place_order(OrderRequest::market("b", SYMBOL, Action::Open, PositionSide::Long, 1.0))
            .await;
        assert!(matches!(result, Err(OmsError::Connector(_))));
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_order_lifecycle_through_manager() {
        let (_connector, manager, _rx) = manager();
        let id = manager
            .place_order(OrderRequest::limit("b", SYMBOL, Action::Open, PositionSide::Long, 1.0, 100.0))
            .await
            .unwrap();

        let partial = UpdateOrderInfo::new(OrderStatus::PartialFilled, 1001.0, 1001.1)
            .with_execution(100.0, 0.4);
        assert!(manager.update_order_info(&id, &partial).await.is_some());
        assert!(manager.update_order_info(&id, &partial).await.is_none());

        let filled = UpdateOrderInfo::new(OrderStatus::Filled, 1002.0, 1002.1)
            .with_execution(100.0, 1.0);
        let last = manager.update_order_info(&id, &filled).await.unwrap();
        assert_eq!(last.status, OrderStatus::Filled);
        assert!(manager.get_order(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_order_never_mutates_local_state() {
        let (connector, manager, _rx) = manager();
        let id = manager
            .place_order(OrderRequest::market("b", SYMBOL, Action::Open, PositionSide::Long, 1.0))
            .await
            .unwrap();
        manager.cancel_order(&id, None).await.unwrap();

        assert_eq!(manager.get_order(&id).await.unwrap().status, OrderStatus::Pending);
        assert_eq!(connector.journal().await.order_cancels, vec![id]);
    }

    #[tokio::test]
    async fn test_delayed_cancel_goes_through_timer() {
        let (connector, manager, _rx) = manager();
        manager.cancel_order("ord-x", Some(5.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(connector.journal().await.order_cancels.is_empty());

        connector.advance(5.0);
        let mut cancels = Vec::new();
        for _ in 0..100 {
            cancels = connector.journal().await.order_cancels;
            if !cancels.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cancels, vec!["ord-x".to_string()]);
    }

    #[tokio::test]
    async fn test_sniffer_placement_and_retention() {
        let (connector, manager, _rx) = manager();
        let kept = manager
            .place_trailing_sniffer("b", SYMBOL, Operator::Ge, 65000.129, 0.01, false)
            .await
            .unwrap();
        let dropped = manager
            .place_target_sniffer("b", SYMBOL, Operator::Le, 60000.0, true)
            .await
            .unwrap();

        assert_eq!(manager.get_sniffer(&kept).await.unwrap().target_price, 65000.12);
        assert_eq!(connector.journal().await.sniffers.len(), 2);

        let triggered = UpdateSnifferInfo::new(SnifferStatus::Triggered, 1001.0, 1001.0);
        assert!(manager.update_sniffer_info(&kept, &triggered).await.is_some());
        assert!(manager.update_sniffer_info(&dropped, &triggered).await.is_some());

        assert!(manager.get_sniffer(&dropped).await.is_none());
        assert_eq!(
            manager.get_sniffer(&kept).await.unwrap().status,
            SnifferStatus::Triggered
        );
        assert!(manager.discard_sniffer(&kept).await.is_some());
        assert!(manager.active_sniffers().await.is_empty());
    }

    #[tokio::test]
    async fn test_place_timer_delivers_event() {
        let (connector, manager, mut rx) = manager();
        manager.place_timer(1010.0, json!({"job": "rebalance"})).unwrap();
        connector.set_time(1010.0);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            OmsEvent::Timer(timer) => assert_eq!(timer.event, json!({"job": "rebalance"})),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_precision_from_connector_trades() {
        let connector = Arc::new(PaperConnector::with_manual_clock(0.0, 100.0));
        connector
            .push_trade("eth_usdt|binance", crate::types::TradeTick::from((95.0, 95.0, 3000.25, 0.01, 1)))
            .await;
        let (tx, _rx) = event_bus();
        let manager = OrderManager::builder(connector.clone(), tx)
            .refresh_precision("eth_usdt|binance", 60.0)
            .await
            .unwrap()
            .build();
        let precision = manager.precision().get(&Symbol::new("eth_usdt|binance")).unwrap();
        assert_eq!((precision.price, precision.amount), (2, 2));
    }
}
