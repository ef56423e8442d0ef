//! Replay command implementation
//!
//! Streams a JSONL script through a paper-mode hub. Each line is either a
//! script step (placement, cancellation, timer, clock advance) executed
//! against the order manager, or a raw inbound frame pushed through the
//! hub. Frames may refer to placed orders and sniffers by their script
//! alias in `order_id`. Every dispatched event is printed as one JSON line.

use algo_oms::connector::{Connector, PaperConnector};
use algo_oms::handler::{Dispatcher, StrategyHandler};
use algo_oms::hub::{ChannelConnection, ChannelPeer, ConnectionHub, InboundSender, OmsService};
use algo_oms::oms::{event_bus, Order, OrderManager, OrderRequest, Sniffer, SnifferRequest, TimerEvent};
use algo_oms::policy::{FillExposureLiquidity, PassRateOptimizer};
use algo_oms::state_manager::SqliteStateManager;
use algo_oms::{data, Config, Signal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const REPLAY_HOST: &str = "replay";

const SCRIPT_STEPS: &[&str] = &[
    "place_order",
    "place_sniffer",
    "cancel_order",
    "cancel_sniffer",
    "discard_sniffer",
    "timer",
    "advance",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ScriptStep {
    PlaceOrder {
        alias: String,
        #[serde(flatten)]
        request: OrderRequest,
    },
    PlaceSniffer {
        alias: String,
        #[serde(flatten)]
        request: SnifferRequest,
    },
    CancelOrder {
        alias: String,
        #[serde(default)]
        delay: Option<f64>,
    },
    CancelSniffer {
        alias: String,
        #[serde(default)]
        delay: Option<f64>,
    },
    DiscardSniffer {
        alias: String,
    },
    Timer {
        fire_at: f64,
        #[serde(default)]
        event: Value,
    },
    Advance {
        secs: f64,
    },
}

#[derive(Debug, Default)]
struct ScriptStats {
    lines: usize,
    steps: usize,
    frames: usize,
    skipped: usize,
}

/// Prints every event it receives as one JSON line
struct EventLog {
    manager: Arc<OrderManager>,
    printed: usize,
}

impl EventLog {
    fn print(&mut self, line: Value) {
        self.printed += 1;
        println!("{}", line);
    }
}

#[async_trait]
impl StrategyHandler for EventLog {
    fn name(&self) -> &str {
        "event_log"
    }

    fn manager(&self) -> &Arc<OrderManager> {
        &self.manager
    }

    async fn on_stop(&mut self) -> algo_oms::Result<()> {
        debug!(
            "event_log printed {} events, {} orders still live",
            self.printed,
            self.manager.len().await
        );
        Ok(())
    }

    async fn on_signal(&mut self, signal: &Signal) -> algo_oms::Result<()> {
        self.print(json!({"event": "signal", "data": signal}));
        Ok(())
    }

    async fn on_order(&mut self, order: &Order) -> algo_oms::Result<()> {
        self.print(json!({"event": "order", "data": order}));
        Ok(())
    }

    async fn on_sniffer(&mut self, sniffer: &Sniffer) -> algo_oms::Result<()> {
        self.print(json!({"event": "sniffer", "data": sniffer}));
        Ok(())
    }

    async fn on_timer(&mut self, timer: &TimerEvent) -> algo_oms::Result<()> {
        self.print(json!({"event": "timer", "data": timer}));
        Ok(())
    }

    async fn on_throttle(&mut self, strategy_ids: &[String]) -> algo_oms::Result<()> {
        self.print(json!({"event": "throttle", "data": strategy_ids}));
        Ok(())
    }
}

pub fn run(
    config_path: Option<String>,
    script_path: String,
    trades_path: Option<String>,
    lookback: Option<f64>,
    linger_ms: u64,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(
        config_path,
        script_path,
        trades_path,
        lookback,
        linger_ms,
    ))
}

async fn run_async(
    config_path: Option<String>,
    script_path: String,
    trades_path: Option<String>,
    lookback: Option<f64>,
    linger_ms: u64,
) -> Result<()> {
    info!("Starting replay of {}", script_path);

    let config = match &config_path {
        Some(path) => {
            info!("Loaded configuration from: {}", path);
            Config::from_file(path)?
        }
        None => Config::from_env()?,
    };

    let connector = Arc::new(match config.paper.start_timestamp {
        Some(start) => PaperConnector::with_manual_clock(config.paper.default_cash, start),
        None => PaperConnector::new(config.paper.default_cash),
    });

    let (events_tx, mut events_rx) = event_bus();
    let mut builder = OrderManager::builder(connector.clone(), events_tx.clone())
        .with_precision(config.precision_engine()?)
        .with_timer_poll(config.hub.timer_poll());

    if let Some(path) = &trades_path {
        let trades = data::load_trades_csv(path)?;
        for (symbol, ticks) in &trades {
            for tick in ticks {
                connector.push_trade(symbol.clone(), *tick).await;
            }
        }
        for symbol in trades.keys() {
            if config.precision.contains_key(symbol.as_str()) {
                continue;
            }
            builder = builder
                .refresh_precision(symbol.clone(), lookback.unwrap_or(f64::INFINITY))
                .await
                .with_context(|| format!("Failed to infer precision for {}", symbol))?;
        }
    }

    let manager = Arc::new(builder.build());
    let service = Arc::new(OmsService::new(manager.clone(), events_tx));
    let hub = Arc::new(ConnectionHub::new(config.hub.inbound_capacity, service));
    let (connection, mut peer) = ChannelConnection::pair(REPLAY_HOST);
    hub.connect(connection).await;

    let mut dispatcher = Dispatcher::new()
        .with_policy(Box::new(config.risk.clone().build("loss_streak")))
        .with_policy(Box::new(FillExposureLiquidity::new(
            "fill_exposure",
            config.liquidity.clone(),
        )?))
        .with_policy(Box::new(PassRateOptimizer::new(
            "pass_rate",
            config.optimizer.clone(),
        )))
        .with_strategy(Box::new(EventLog {
            manager: manager.clone(),
            printed: 0,
        }));

    let store = if config.checkpoint.enabled {
        let store = SqliteStateManager::new(
            &config.checkpoint.db_path,
            &config.checkpoint.json_backup_path,
            config.checkpoint.auto_backup,
        )?;
        let restored = dispatcher.restore(&store)?;
        info!("Restored {} policy modules from checkpoint", restored);
        Some(store)
    } else {
        None
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let dispatch_task = tokio::spawn(async move {
        let delivered = dispatcher
            .run(&mut events_rx, async move {
                let _ = stop_rx.await;
            })
            .await;
        (dispatcher, delivered)
    });

    let serve_task = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.serve().await })
    };

    let inbound = hub.inbound().await.context("Inbound queue already closed")?;
    let stats = feed_script(&script_path, &manager, connector.as_ref(), &hub, &peer, &inbound).await?;
    drop(inbound);
    hub.close_inbound().await;
    serve_task.await.context("Service loop panicked")??;

    tokio::time::sleep(Duration::from_millis(linger_ms)).await;
    let _ = stop_tx.send(());
    let (dispatcher, delivered) = dispatch_task.await.context("Dispatcher panicked")?;

    if let Some(store) = &store {
        let saved = dispatcher.checkpoint(store)?;
        info!("Checkpointed {} policy modules", saved);
    }

    let mut outbound = 0;
    while peer.try_recv().is_some() {
        outbound += 1;
    }

    info!(
        "Replay finished: {} lines, {} steps, {} frames, {} skipped, {} events, {} outbound",
        stats.lines, stats.steps, stats.frames, stats.skipped, delivered, outbound
    );
    let throttled = dispatcher.throttled();
    if !throttled.is_empty() {
        info!("Throttled strategies: {}", throttled.join(", "));
    }
    for (symbol, multiplier) in dispatcher.adjustments() {
        info!("Sizing multiplier {}: {:.4}", symbol, multiplier);
    }
    Ok(())
}

async fn feed_script(
    path: &str,
    manager: &OrderManager,
    connector: &PaperConnector,
    hub: &ConnectionHub,
    peer: &ChannelPeer,
    inbound: &InboundSender,
) -> Result<ScriptStats> {
    let file = File::open(path).with_context(|| format!("Failed to open script {}", path))?;
    let mut aliases: HashMap<String, String> = HashMap::new();
    let mut stats = ScriptStats::default();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.lines += 1;

        let mut value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Line {} is not JSON, skipped: {}", idx + 1, e);
                stats.skipped += 1;
                continue;
            }
        };

        let is_step = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| SCRIPT_STEPS.contains(&t));
        if !is_step {
            if let Some(alias) = value.get("order_id").and_then(Value::as_str) {
                if let Some(order_id) = aliases.get(alias) {
                    value["order_id"] = Value::String(order_id.clone());
                }
            }
            peer.push(inbound, value.to_string()).await?;
            stats.frames += 1;
            continue;
        }

        let step: ScriptStep = match serde_json::from_value(value) {
            Ok(step) => step,
            Err(e) => {
                warn!("Line {} is not a valid step, skipped: {}", idx + 1, e);
                stats.skipped += 1;
                continue;
            }
        };
        match run_step(step, manager, connector, hub, &mut aliases).await {
            Ok(()) => stats.steps += 1,
            Err(e) => {
                warn!("Line {} failed: {}", idx + 1, e);
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

async fn run_step(
    step: ScriptStep,
    manager: &OrderManager,
    connector: &PaperConnector,
    hub: &ConnectionHub,
    aliases: &mut HashMap<String, String>,
) -> Result<()> {
    let resolve = |aliases: &HashMap<String, String>, alias: &str| {
        aliases.get(alias).cloned().unwrap_or_else(|| alias.to_string())
    };

    match step {
        ScriptStep::PlaceOrder { alias, request } => {
            let order_id = manager.place_order(request).await?;
            if let Some(order) = manager.get_order(&order_id).await {
                hub.send_msg(REPLAY_HOST, &json!({"type": "place_order", "order": order}).to_string())
                    .await;
            }
            debug!("{} -> order {}", alias, order_id);
            aliases.insert(alias, order_id);
        }
        ScriptStep::PlaceSniffer { alias, request } => {
            let order_id = manager.place_sniffer(request).await?;
            if let Some(sniffer) = manager.get_sniffer(&order_id).await {
                hub.send_msg(REPLAY_HOST, &json!({"type": "place_sniffer", "sniffer": sniffer}).to_string())
                    .await;
            }
            debug!("{} -> sniffer {}", alias, order_id);
            aliases.insert(alias, order_id);
        }
        ScriptStep::CancelOrder { alias, delay } => {
            manager.cancel_order(&resolve(aliases, &alias), delay).await?;
        }
        ScriptStep::CancelSniffer { alias, delay } => {
            manager.cancel_sniffer(&resolve(aliases, &alias), delay).await?;
        }
        ScriptStep::DiscardSniffer { alias } => {
            if manager.discard_sniffer(&resolve(aliases, &alias)).await.is_none() {
                warn!("No retained sniffer {} to discard", alias);
            }
        }
        ScriptStep::Timer { fire_at, event } => {
            manager.place_timer(fire_at, event)?;
        }
        ScriptStep::Advance { secs } => {
            connector.advance(secs);
            debug!("Clock advanced to {}", connector.get_current_timestamp());
        }
    }
    Ok(())
}
