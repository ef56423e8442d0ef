//! Per-symbol price/amount quantization
//!
//! Exchanges reject orders whose price or amount is not a multiple of the
//! symbol's tick/lot size. Quantization here is deliberately *not* standard
//! rounding:
//!
//! ```text
//! q(x) = (trunc(x * 10^d) + (round_up ? 1 : 0)) / 10^d
//! ```
//!
//! so `round_up = false` is a floor toward zero and `round_up = true` is
//! "floor plus one tick", even for values already on a tick boundary.
//! All arithmetic runs in `Decimal` so that values like `0.29` are not
//! truncated to `0.28` by binary float error.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{OmsError, Result};
use crate::types::{Symbol, TradeTick};

/// Largest digit count accepted for a price or amount.
pub const MAX_DIGITS: u32 = 12;

/// Decimal digits for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub price: u32,
    pub amount: u32,
}

/// Precision dictionary plus quantization.
///
/// Populated during bootstrap, then frozen inside the
/// [`OrderManager`](crate::oms::OrderManager); registration needs `&mut self`,
/// quantization only `&self`.
#[derive(Debug, Clone, Default)]
pub struct PrecisionEngine {
    dict: HashMap<Symbol, Precision>,
}

impl PrecisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) the digits for `symbol`.
    pub fn register(
        &mut self,
        symbol: impl Into<Symbol>,
        price_digits: u32,
        amount_digits: u32,
    ) -> Result<()> {
        let symbol = symbol.into();
        if price_digits > MAX_DIGITS || amount_digits > MAX_DIGITS {
            return Err(OmsError::Validation(format!(
                "precision for {} exceeds {} digits (price={}, amount={})",
                symbol, MAX_DIGITS, price_digits, amount_digits
            )));
        }
        debug!(
            "Precision registered: {} price={} amount={}",
            symbol, price_digits, amount_digits
        );
        self.dict.insert(
            symbol,
            Precision {
                price: price_digits,
                amount: amount_digits,
            },
        );
        Ok(())
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Precision> {
        self.dict.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.dict.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn quantize_price(&self, symbol: &Symbol, price: f64, round_up: bool) -> Result<f64> {
        let precision = self.lookup(symbol)?;
        quantize(price, precision.price, round_up)
    }

    pub fn quantize_amount(&self, symbol: &Symbol, amount: f64, round_up: bool) -> Result<f64> {
        let precision = self.lookup(symbol)?;
        quantize(amount, precision.amount, round_up)
    }

    /// Infer and register digits from recent trades.
    ///
    /// Digits are the largest number of significant decimals seen in the
    /// trade prices and amounts, capped at [`MAX_DIGITS`].
    pub fn refresh_from_trades(
        &mut self,
        symbol: impl Into<Symbol>,
        trades: &[TradeTick],
    ) -> Result<Precision> {
        let symbol = symbol.into();
        if trades.is_empty() {
            return Err(OmsError::Validation(format!(
                "no trades to infer precision for {}",
                symbol
            )));
        }

        let mut price_digits = 0;
        let mut amount_digits = 0;
        for trade in trades {
            price_digits = price_digits.max(decimal_places(trade.price)?);
            amount_digits = amount_digits.max(decimal_places(trade.amount)?);
        }

        if price_digits > MAX_DIGITS || amount_digits > MAX_DIGITS {
            warn!(
                "Inferred precision for {} capped at {} (price={}, amount={})",
                symbol, MAX_DIGITS, price_digits, amount_digits
            );
        }
        let precision = Precision {
            price: price_digits.min(MAX_DIGITS),
            amount: amount_digits.min(MAX_DIGITS),
        };
        self.register(symbol, precision.price, precision.amount)?;
        Ok(precision)
    }

    fn lookup(&self, symbol: &Symbol) -> Result<Precision> {
        self.get(symbol)
            .ok_or_else(|| OmsError::MissingPrecision(symbol.to_string()))
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    // Display gives the shortest round-trip representation of the float.
    Decimal::from_str(&value.to_string()).map_err(|e| OmsError::InvalidNumber {
        value,
        reason: e.to_string(),
    })
}

fn decimal_places(value: f64) -> Result<u32> {
    Ok(to_decimal(value)?.normalize().scale())
}

/// Truncate-then-bias quantization to `digits` decimals.
pub fn quantize(value: f64, digits: u32, round_up: bool) -> Result<f64> {
    let overflow = || OmsError::InvalidNumber {
        value,
        reason: format!("overflow at {} digits", digits),
    };

    if digits > MAX_DIGITS {
        return Err(OmsError::InvalidNumber {
            value,
            reason: format!("{} digits exceeds {}", digits, MAX_DIGITS),
        });
    }
    let factor = Decimal::from(10_i64.pow(digits));
    let mut ticks = to_decimal(value)?
        .checked_mul(factor)
        .ok_or_else(overflow)?
        .trunc();
    if round_up {
        ticks = ticks.checked_add(Decimal::ONE).ok_or_else(overflow)?;
    }
    let quantized = (ticks / factor).round_dp(digits);
    quantized.to_f64().ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PrecisionEngine {
        let mut engine = PrecisionEngine::new();
        engine.register("btc_usdt|binance_future", 2, 3).unwrap();
        engine
    }

    #[test]
    fn test_quantize_price_floor_and_bias() {
        let engine = engine();
        let symbol = Symbol::new("btc_usdt|binance_future");
        assert_eq!(engine.quantize_price(&symbol, 100.127, false).unwrap(), 100.12);
        assert_eq!(engine.quantize_price(&symbol, 100.127, true).unwrap(), 100.13);
    }

    #[test]
    fn test_round_up_on_tick_boundary_adds_tick() {
        let engine = engine();
        let symbol = Symbol::new("btc_usdt|binance_future");
        assert_eq!(engine.quantize_price(&symbol, 100.12, true).unwrap(), 100.13);
        assert_eq!(engine.quantize_price(&symbol, 100.12, false).unwrap(), 100.12);
    }

    #[test]
    fn test_quantize_amount_uses_amount_digits() {
        let engine = engine();
        let symbol = Symbol::new("btc_usdt|binance_future");
        assert_eq!(engine.quantize_amount(&symbol, 0.12345, false).unwrap(), 0.123);
        assert_eq!(engine.quantize_amount(&symbol, 0.12345, true).unwrap(), 0.124);
    }

    #[test]
    fn test_binary_float_values_stay_on_tick() {
        // 0.29 * 100 is 28.999999999999996 in f64
        assert_eq!(quantize(0.29, 2, false).unwrap(), 0.29);
        assert_eq!(quantize(1.005, 3, false).unwrap(), 1.005);
    }

    #[test]
    fn test_truncates_toward_zero_for_negative_values() {
        assert_eq!(quantize(-1.239, 2, false).unwrap(), -1.23);
        assert_eq!(quantize(-1.239, 2, true).unwrap(), -1.22);
    }

    #[test]
    fn test_zero_digits() {
        assert_eq!(quantize(42.9, 0, false).unwrap(), 42.0);
        assert_eq!(quantize(42.9, 0, true).unwrap(), 43.0);
    }

    #[test]
    fn test_unregistered_symbol_is_config_error() {
        let engine = engine();
        let err = engine
            .quantize_price(&Symbol::new("eth_usdt|binance_future"), 1.0, false)
            .unwrap_err();
        assert!(matches!(err, OmsError::MissingPrecision(_)));
    }

    #[test]
    fn test_non_finite_value_rejected() {
        assert!(matches!(
            quantize(f64::NAN, 2, false),
            Err(OmsError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_register_rejects_excessive_digits() {
        let mut engine = PrecisionEngine::new();
        assert!(engine.register("x|y", MAX_DIGITS + 1, 0).is_err());
    }

    #[test]
    fn test_refresh_from_trades() {
        let mut engine = PrecisionEngine::new();
        let trades = vec![
            TradeTick::from((1.0, 1.0, 64250.5, 0.001, 1)),
            TradeTick::from((2.0, 2.0, 64250.25, 0.12, -1)),
            TradeTick::from((3.0, 3.0, 64251.0, 2.0, 1)),
        ];
        let precision = engine
            .refresh_from_trades("btc_usdt|binance", &trades)
            .unwrap();
        assert_eq!(precision, Precision { price: 2, amount: 3 });
        assert_eq!(engine.get(&Symbol::new("btc_usdt|binance")), Some(precision));
    }

    #[test]
    fn test_refresh_without_trades_fails() {
        let mut engine = PrecisionEngine::new();
        assert!(engine.refresh_from_trades("btc_usdt|binance", &[]).is_err());
    }
}
