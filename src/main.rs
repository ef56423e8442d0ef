//! Algorithmic trading OMS - main entry point
//!
//! This binary provides two subcommands:
//! - replay: Stream a JSONL script of placements and exchange frames through a paper hub
//! - quantize: Quantize a price or amount with the configured symbol precision

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "algo-oms")]
#[command(about = "Order and trigger management with a paper-mode connection hub", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a script through the paper connector
    Replay {
        /// Path to configuration file (environment defaults when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// JSONL script of steps and inbound frames
        #[arg(short, long)]
        frames: String,

        /// Trades CSV seeding the paper connector
        #[arg(short, long)]
        trades: Option<String>,

        /// Seconds of trades used to infer precision for unconfigured symbols
        #[arg(long)]
        lookback: Option<f64>,

        /// Milliseconds to wait for timers after the script ends
        #[arg(long, default_value = "100")]
        linger_ms: u64,
    },

    /// Quantize a price and/or amount
    Quantize {
        /// Path to configuration file (environment defaults when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Symbol, e.g. "btc_usdt|binance_future"
        #[arg(short, long)]
        symbol: String,

        #[arg(long)]
        price: Option<f64>,

        #[arg(long)]
        amount: Option<f64>,

        /// Truncate to the tick, then add one tick (applied even on a tick boundary)
        #[arg(long)]
        round_up: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{},rusqlite=warn", level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    // stdout carries replay events, so the console layer goes to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Replay { .. } => "replay",
        Commands::Quantize { .. } => "quantize",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Replay {
            config,
            frames,
            trades,
            lookback,
            linger_ms,
        } => commands::replay::run(config, frames, trades, lookback, linger_ms),

        Commands::Quantize {
            config,
            symbol,
            price,
            amount,
            round_up,
        } => commands::quantize::run(config, symbol, price, amount, round_up),
    }
}
