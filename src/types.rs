//! Core data types shared across the OMS
//!
//! Enumerations serialize as the lowercase wire strings exchanges and
//! strategy modules exchange (`"limit"`, `"partial_filled"`, ...).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{OmsError, Result};

/// Number of decimal digits every timestamp is rounded to on write.
pub const TIMESTAMP_DIGITS: i32 = 6;

/// Round a timestamp (seconds) to [`TIMESTAMP_DIGITS`] decimals.
pub fn round_timestamp(ts: f64) -> f64 {
    let factor = 10f64.powi(TIMESTAMP_DIGITS);
    (ts * factor).round() / factor
}

/// Optional variant of [`round_timestamp`].
pub fn round_timestamp_opt(ts: Option<f64>) -> Option<f64> {
    ts.map(round_timestamp)
}

/// Trading pair symbol in `base_quote|exchange` form, e.g. `btc_usdt|binance_future`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pair part before the `|` separator.
    pub fn pair(&self) -> &str {
        self.0.split('|').next().unwrap_or(&self.0)
    }

    /// Exchange part after the `|` separator.
    pub fn exchange(&self) -> Result<&str> {
        match self.0.split_once('|') {
            Some((_, exchange)) if !exchange.is_empty() => Ok(exchange),
            _ => Err(OmsError::Validation(format!(
                "symbol {} is not in pair|exchange form",
                self.0
            ))),
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    ConditionLimit,
    ConditionMarket,
}

impl OrderType {
    /// Whether orders of this type carry a limit price.
    pub fn requires_price(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::ConditionLimit)
    }
}

/// Whether an order opens or closes exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Open,
    Close,
}

/// Position side an order acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

/// Trade direction: +1 buys, -1 sells.
pub fn direction(position: PositionSide, action: Action) -> i8 {
    match (position, action) {
        (PositionSide::Long, Action::Open) => 1,
        (PositionSide::Long, Action::Close) => -1,
        (PositionSide::Short, Action::Open) => -1,
        (PositionSide::Short, Action::Close) => 1,
    }
}

/// Execution feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Fill or kill
    Fok,
    /// Fill and kill (immediate or cancel)
    Fak,
    /// Post only
    Gtx,
    /// Join the book queue at the best price; no explicit price needed
    Queue,
}

/// Order status. Acceptance is governed by [`OrderStatus::rank`], not by
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Waiting,
    Triggered,
    PartialFilled,
    Canceling,
    Canceled,
    Error,
    Filled,
}

impl OrderStatus {
    pub const TERMINAL_RANK: u8 = 5;

    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Waiting => 1,
            OrderStatus::Triggered => 2,
            OrderStatus::PartialFilled => 3,
            OrderStatus::Canceling => 4,
            OrderStatus::Canceled | OrderStatus::Error | OrderStatus::Filled => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() >= Self::TERMINAL_RANK
    }
}

/// Sniffer (conditional trigger) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnifferStatus {
    Pending,
    Waiting,
    Triggered,
    Canceled,
    Error,
}

impl SnifferStatus {
    pub const TERMINAL_RANK: u8 = 2;

    pub fn rank(self) -> u8 {
        match self {
            SnifferStatus::Pending => 0,
            SnifferStatus::Waiting => 1,
            SnifferStatus::Triggered | SnifferStatus::Canceled | SnifferStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() >= Self::TERMINAL_RANK
    }
}

/// Comparison a sniffer applies between the market price and its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "gt", alias = ">")]
    Gt,
    #[serde(rename = "ge", alias = ">=")]
    Ge,
    #[serde(rename = "lt", alias = "<")]
    Lt,
    #[serde(rename = "le", alias = "<=")]
    Le,
}

/// Trading signal handed to strategy/execute modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub batch_id: String,
    pub symbol: Symbol,
    pub action: Action,
    pub position: PositionSide,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub price_dict: Option<HashMap<Symbol, f64>>,
}

impl Signal {
    pub fn new(
        batch_id: impl Into<String>,
        symbol: impl Into<Symbol>,
        action: Action,
        position: PositionSide,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            symbol: symbol.into(),
            action,
            position,
            timestamp: None,
            price_dict: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(round_timestamp(timestamp));
        self
    }

    pub fn direction(&self) -> i8 {
        direction(self.position, self.action)
    }

    /// Normalize the timestamp to six decimals.
    pub fn rounded(mut self) -> Self {
        self.timestamp = round_timestamp_opt(self.timestamp);
        self
    }
}

/// Multi-symbol signal expressed as parallel lists sharing one batch id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BatchSignalParts")]
pub struct BatchSignal {
    batch_id: String,
    symbols: Vec<Symbol>,
    actions: Vec<Action>,
    positions: Vec<PositionSide>,
    timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prices: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct BatchSignalParts {
    batch_id: String,
    symbols: Vec<Symbol>,
    actions: Vec<Action>,
    positions: Vec<PositionSide>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    prices: Option<Vec<f64>>,
}

impl TryFrom<BatchSignalParts> for BatchSignal {
    type Error = OmsError;

    fn try_from(p: BatchSignalParts) -> Result<Self> {
        let batch = BatchSignal::new(p.batch_id, p.symbols, p.actions, p.positions, p.timestamp)?;
        match p.prices {
            Some(prices) => batch.with_prices(prices),
            None => Ok(batch),
        }
    }
}

impl BatchSignal {
    /// Build a batch signal; the three lists must have equal length.
    pub fn new(
        batch_id: impl Into<String>,
        symbols: Vec<Symbol>,
        actions: Vec<Action>,
        positions: Vec<PositionSide>,
        timestamp: Option<f64>,
    ) -> Result<Self> {
        if symbols.len() != actions.len() || symbols.len() != positions.len() {
            return Err(OmsError::Validation(format!(
                "batch signal lists differ in length: symbols={}, actions={}, positions={}",
                symbols.len(),
                actions.len(),
                positions.len()
            )));
        }
        Ok(Self {
            batch_id: batch_id.into(),
            symbols,
            actions,
            positions,
            timestamp: round_timestamp_opt(timestamp),
            prices: None,
        })
    }

    /// Attach one reference price per symbol.
    pub fn with_prices(mut self, prices: Vec<f64>) -> Result<Self> {
        if prices.len() != self.symbols.len() {
            return Err(OmsError::Validation(format!(
                "batch signal has {} symbols but {} prices",
                self.symbols.len(),
                prices.len()
            )));
        }
        self.prices = Some(prices);
        Ok(self)
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Expand into one [`Signal`] per symbol.
    pub fn signals(&self) -> Vec<Signal> {
        let price_dict: Option<HashMap<Symbol, f64>> = self
            .prices
            .as_ref()
            .map(|prices| self.symbols.iter().cloned().zip(prices.iter().copied()).collect());
        self.symbols
            .iter()
            .zip(&self.actions)
            .zip(&self.positions)
            .map(|((symbol, &action), &position)| Signal {
                batch_id: self.batch_id.clone(),
                symbol: symbol.clone(),
                action,
                position,
                timestamp: self.timestamp,
                price_dict: price_dict.clone(),
            })
            .collect()
    }
}

/// Realized outcome of one batch, consumed by policy modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningInfo {
    pub batch_id: String,
    /// Strategy that issued the batch
    pub strategy_id: String,
    pub start_timestamp: f64,
    pub open_timestamp: f64,
    pub close_timestamp: f64,
    /// Realized return before fees
    pub earning: f64,
    /// Realized return after fees
    pub earning_net: f64,
    pub optimizer_pass: bool,
    pub risk_pass: bool,
}

impl EarningInfo {
    pub fn is_win(&self) -> bool {
        self.earning_net > 0.0
    }

    /// Normalize every timestamp field to six decimals.
    pub fn rounded(mut self) -> Self {
        self.start_timestamp = round_timestamp(self.start_timestamp);
        self.open_timestamp = round_timestamp(self.open_timestamp);
        self.close_timestamp = round_timestamp(self.close_timestamp);
        self
    }
}

/// Recent trade record: `[recv_ts, exchange_ts, price, amount, direction]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, f64, f64, i8)", into = "(f64, f64, f64, f64, i8)")]
pub struct TradeTick {
    pub recv_ts: f64,
    pub exchange_ts: f64,
    pub price: f64,
    pub amount: f64,
    pub direction: i8,
}

impl From<(f64, f64, f64, f64, i8)> for TradeTick {
    fn from((recv_ts, exchange_ts, price, amount, direction): (f64, f64, f64, f64, i8)) -> Self {
        Self {
            recv_ts: round_timestamp(recv_ts),
            exchange_ts: round_timestamp(exchange_ts),
            price,
            amount,
            direction,
        }
    }
}

impl From<TradeTick> for (f64, f64, f64, f64, i8) {
    fn from(t: TradeTick) -> Self {
        (t.recv_ts, t.exchange_ts, t.price, t.amount, t.direction)
    }
}
