//! Exchange connector interface
//!
//! The OMS never speaks an exchange wire protocol itself. A connector
//! supplies the clock, market data queries, and forwards placement and
//! cancellation requests; the outcome of those requests comes back later as
//! status frames through the [`ConnectionHub`](crate::hub::ConnectionHub).

pub mod paper;

use async_trait::async_trait;

use crate::error::Result;
use crate::oms::order::Order;
use crate::oms::sniffer::Sniffer;
use crate::types::{Symbol, TradeTick};

pub use paper::PaperConnector;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Current time in seconds since the epoch.
    fn get_current_timestamp(&self) -> f64;

    async fn get_current_price(&self, symbol: &Symbol) -> Result<f64>;

    /// Trades for `symbol` with exchange time in `[start_ts, end_ts]`.
    async fn get_batch_price(
        &self,
        symbol: &Symbol,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<TradeTick>>;

    /// Cash available for trading `symbol`.
    async fn get_trading_cash(&self, symbol: &Symbol) -> Result<f64>;

    async fn submit_order(&self, order: &Order) -> Result<()>;

    /// Request cancellation. The outcome arrives as a later status update.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn submit_sniffer(&self, sniffer: &Sniffer) -> Result<()>;

    async fn cancel_sniffer(&self, order_id: &str) -> Result<()>;
}
