//! Trade data loading
//!
//! Loads recent-trade records from CSV for seeding the paper connector and
//! refreshing symbol precision. Expected columns:
//!
//! ```text
//! symbol,recv_ts,exchange_ts,price,amount,direction
//! btc_usdt|binance_future,1700000000.1,1700000000.05,64250.5,0.012,1
//! ```

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::{Symbol, TradeTick};

/// Load trades from CSV, grouped by symbol in file order
pub fn load_trades_csv(path: impl AsRef<Path>) -> Result<BTreeMap<Symbol, Vec<TradeTick>>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut trades: BTreeMap<Symbol, Vec<TradeTick>> = BTreeMap::new();
    let mut rows = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;
        let row = row_idx + 1;
        let number = |idx: usize, name: &str| -> Result<f64> {
            column(&record, idx, name, row)?
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} in row {}", name, row))
        };

        let symbol = Symbol::new(column(&record, 0, "symbol", row)?);
        symbol.exchange()?;
        let direction: i8 = column(&record, 5, "direction", row)?
            .parse()
            .with_context(|| format!("Failed to parse direction in row {}", row))?;
        if direction != 1 && direction != -1 {
            anyhow::bail!("direction must be 1 or -1 in row {}, got {}", row, direction);
        }

        let tick = TradeTick::from((
            number(1, "recv_ts")?,
            number(2, "exchange_ts")?,
            number(3, "price")?,
            number(4, "amount")?,
            direction,
        ));
        trades.entry(symbol).or_default().push(tick);
        rows += 1;
    }

    info!(
        "Loaded {} trades for {} symbols from {}",
        rows,
        trades.len(),
        path.display()
    );
    Ok(trades)
}

fn column<'a>(record: &'a csv::StringRecord, idx: usize, name: &str, row: usize) -> Result<&'a str> {
    record
        .get(idx)
        .map(str::trim)
        .with_context(|| format!("Missing {} column in row {}", name, row))
}
