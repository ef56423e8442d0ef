//! In-memory connector for paper mode and tests
//!
//! Serves prices from pushed trades, records every outbound request, and can
//! run on a manually advanced clock.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Connector;
use crate::error::{OmsError, Result};
use crate::oms::order::{Order, OrderId};
use crate::oms::sniffer::Sniffer;
use crate::types::{round_timestamp, Symbol, TradeTick};

/// Requests the paper connector has received
#[derive(Debug, Clone, Default)]
pub struct PaperJournal {
    pub orders: Vec<Order>,
    pub sniffers: Vec<Sniffer>,
    pub order_cancels: Vec<OrderId>,
    pub sniffer_cancels: Vec<OrderId>,
}

#[derive(Debug)]
pub struct PaperConnector {
    /// `f64::to_bits` of the manual clock; `u64::MAX` means wall clock
    clock: AtomicU64,
    reject_orders: AtomicBool,
    trades: Mutex<HashMap<Symbol, Vec<TradeTick>>>,
    cash: Mutex<HashMap<Symbol, f64>>,
    default_cash: f64,
    journal: Mutex<PaperJournal>,
}

const WALL_CLOCK: u64 = u64::MAX;

impl PaperConnector {
    /// Connector on the wall clock with `default_cash` per symbol.
    pub fn new(default_cash: f64) -> Self {
        Self {
            clock: AtomicU64::new(WALL_CLOCK),
            reject_orders: AtomicBool::new(false),
            trades: Mutex::new(HashMap::new()),
            cash: Mutex::new(HashMap::new()),
            default_cash,
            journal: Mutex::new(PaperJournal::default()),
        }
    }

    /// Connector on a manual clock starting at `start_ts`.
    pub fn with_manual_clock(default_cash: f64, start_ts: f64) -> Self {
        let connector = Self::new(default_cash);
        connector.set_time(start_ts);
        connector
    }

    pub fn set_time(&self, ts: f64) {
        self.clock
            .store(round_timestamp(ts).to_bits(), Ordering::SeqCst);
    }

    /// Move the manual clock forward; switches off the wall clock.
    pub fn advance(&self, secs: f64) {
        let now = self.get_current_timestamp();
        self.set_time(now + secs);
    }

    /// Make subsequent order submissions fail.
    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    pub async fn set_cash(&self, symbol: impl Into<Symbol>, cash: f64) {
        self.cash.lock().await.insert(symbol.into(), cash);
    }

    pub async fn push_trade(&self, symbol: impl Into<Symbol>, tick: TradeTick) {
        self.trades
            .lock()
            .await
            .entry(symbol.into())
            .or_default()
            .push(tick);
    }

    /// Snapshot of every request received so far
    pub async fn journal(&self) -> PaperJournal {
        self.journal.lock().await.clone()
    }
}

impl Default for PaperConnector {
    fn default() -> Self {
        Self::new(10_000.0)
    }
}

#[async_trait]
impl Connector for PaperConnector {
    fn get_current_timestamp(&self) -> f64 {
        match self.clock.load(Ordering::SeqCst) {
            WALL_CLOCK => round_timestamp(Utc::now().timestamp_micros() as f64 / 1e6),
            bits => f64::from_bits(bits),
        }
    }

    async fn get_current_price(&self, symbol: &Symbol) -> Result<f64> {
        self.trades
            .lock()
            .await
            .get(symbol)
            .and_then(|ticks| ticks.last())
            .map(|tick| tick.price)
            .ok_or_else(|| OmsError::Connector(format!("no trades for {}", symbol)))
    }

    async fn get_batch_price(
        &self,
        symbol: &Symbol,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<TradeTick>> {
        Ok(self
            .trades
            .lock()
            .await
            .get(symbol)
            .map(|ticks| {
                ticks
                    .iter()
                    .filter(|t| t.exchange_ts >= start_ts && t.exchange_ts <= end_ts)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_trading_cash(&self, symbol: &Symbol) -> Result<f64> {
        Ok(self
            .cash
            .lock()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(self.default_cash))
    }

    async fn submit_order(&self, order: &Order) -> Result<()> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(OmsError::Connector(format!(
                "paper connector rejected order {}",
                order.order_id
            )));
        }
        info!(
            "[PAPER] {:?} {:?}/{:?} {} amount={} price={:?}",
            order.order_type, order.position, order.action, order.symbol, order.amount, order.price
        );
        self.journal.lock().await.orders.push(order.clone());
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        debug!("[PAPER] cancel order {}", order_id);
        self.journal
            .lock()
            .await
            .order_cancels
            .push(order_id.to_string());
        Ok(())
    }

    async fn submit_sniffer(&self, sniffer: &Sniffer) -> Result<()> {
        info!(
            "[PAPER] sniffer {:?} {} {:?} {}",
            sniffer.kind, sniffer.symbol, sniffer.operator, sniffer.target_price
        );
        self.journal.lock().await.sniffers.push(sniffer.clone());
        Ok(())
    }

    async fn cancel_sniffer(&self, order_id: &str) -> Result<()> {
        debug!("[PAPER] cancel sniffer {}", order_id);
        self.journal
            .lock()
            .await
            .sniffer_cancels
            .push(order_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOL: &str = "btc_usdt|binance";

    #[tokio::test]
    async fn test_manual_clock() {
        let connector = PaperConnector::with_manual_clock(1000.0, 100.0);
        assert_eq!(connector.get_current_timestamp(), 100.0);
        connector.advance(1.5);
        assert_eq!(connector.get_current_timestamp(), 101.5);
    }

    #[tokio::test]
    async fn test_wall_clock_is_recent() {
        let connector = PaperConnector::default();
        assert!(connector.get_current_timestamp() > 1_600_000_000.0);
    }

    #[tokio::test]
    async fn test_prices_and_batches() {
        let connector = PaperConnector::default();
        let symbol = Symbol::new(SYMBOL);
        assert!(connector.get_current_price(&symbol).await.is_err());

        connector
            .push_trade(SYMBOL, TradeTick::from((1.0, 1.0, 100.0, 1.0, 1)))
            .await;
        connector
            .push_trade(SYMBOL, TradeTick::from((2.0, 2.0, 101.0, 1.0, -1)))
            .await;
        connector
            .push_trade(SYMBOL, TradeTick::from((3.0, 3.0, 102.0, 1.0, 1)))
            .await;

        assert_eq!(connector.get_current_price(&symbol).await.unwrap(), 102.0);
        let batch = connector.get_batch_price(&symbol, 1.5, 3.0).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].price, 101.0);
    }

    #[tokio::test]
    async fn test_cash_defaults_and_overrides() {
        let connector = PaperConnector::new(500.0);
        let symbol = Symbol::new(SYMBOL);
        assert_eq!(connector.get_trading_cash(&symbol).await.unwrap(), 500.0);
        connector.set_cash(SYMBOL, 42.0).await;
        assert_eq!(connector.get_trading_cash(&symbol).await.unwrap(), 42.0);
    }

    #[tokio::test]
    async fn test_cancels_are_journaled() {
        let connector = PaperConnector::default();
        connector.cancel_order("a").await.unwrap();
        connector.cancel_sniffer("b").await.unwrap();
        let journal = connector.journal().await;
        assert_eq!(journal.order_cancels, vec!["a".to_string()]);
        assert_eq!(journal.sniffer_cancels, vec!["b".to_string()]);
    }
}
