//! Quantize command implementation

use algo_oms::{Config, Symbol};
use anyhow::{Context, Result};
use tracing::info;

pub fn run(
    config_path: Option<String>,
    symbol: String,
    price: Option<f64>,
    amount: Option<f64>,
    round_up: bool,
) -> Result<()> {
    if price.is_none() && amount.is_none() {
        anyhow::bail!("Nothing to quantize: pass --price and/or --amount");
    }

    let config = match &config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    let engine = config.precision_engine()?;
    let symbol = Symbol::new(symbol);
    let digits = engine
        .get(&symbol)
        .with_context(|| format!("No precision configured for {}", symbol))?;
    info!(
        "Precision for {}: price={} amount={}",
        symbol, digits.price, digits.amount
    );

    if let Some(price) = price {
        let quantized = engine.quantize_price(&symbol, price, round_up)?;
        println!("price  {} -> {}", price, quantized);
    }
    if let Some(amount) = amount {
        let quantized = engine.quantize_amount(&symbol, amount, round_up)?;
        println!("amount {} -> {}", amount, quantized);
    }
    Ok(())
}
