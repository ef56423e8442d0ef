//! Event fan-out to handler modules
//!
//! Each event is delivered once to every registered module, policies before
//! strategies, in the order it was accepted onto the bus. Throttle decisions
//! are forwarded to strategy handlers straight away; sizing adjustments are
//! merged into a per-symbol table the execution side can query.

use itertools::Itertools;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, error, info, warn};

use super::{PolicyDecision, PolicyHandler, StrategyHandler};
use crate::error::Result;
use crate::oms::event::{EventReceiver, OmsEvent};
use crate::state_manager::SqliteStateManager;
use crate::types::Symbol;

#[derive(Default)]
pub struct Dispatcher {
    strategies: Vec<Box<dyn StrategyHandler>>,
    policies: Vec<Box<dyn PolicyHandler>>,
    /// Latest throttle list per policy module
    throttles: HashMap<String, Vec<String>>,
    adjustments: HashMap<Symbol, f64>,
    delivered: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, handler: Box<dyn StrategyHandler>) -> Self {
        self.add_strategy(handler);
        self
    }

    pub fn with_policy(mut self, handler: Box<dyn PolicyHandler>) -> Self {
        self.add_policy(handler);
        self
    }

    pub fn add_strategy(&mut self, handler: Box<dyn StrategyHandler>) {
        debug!("Strategy handler registered: {} [{}]", handler.name(), handler.kind());
        self.strategies.push(handler);
    }

    pub fn add_policy(&mut self, handler: Box<dyn PolicyHandler>) {
        debug!("Policy handler registered: {} [{}]", handler.name(), handler.kind());
        self.policies.push(handler);
    }

    /// Events delivered so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Union of every policy's current throttle list, sorted
    pub fn throttled(&self) -> Vec<String> {
        self.throttles
            .values()
            .flatten()
            .cloned()
            .sorted()
            .dedup()
            .collect()
    }

    pub fn is_throttled(&self, strategy_id: &str) -> bool {
        self.throttles
            .values()
            .any(|ids| ids.iter().any(|id| id == strategy_id))
    }

    pub fn adjustments(&self) -> &HashMap<Symbol, f64> {
        &self.adjustments
    }

    /// Sizing multiplier for `symbol`, 1.0 when no policy adjusted it
    pub fn adjustment(&self, symbol: &Symbol) -> f64 {
        self.adjustments.get(symbol).copied().unwrap_or(1.0)
    }

    pub fn policies(&self) -> impl Iterator<Item = &dyn PolicyHandler> {
        self.policies.iter().map(|p| p.as_ref())
    }

    pub async fn start(&mut self) {
        for handler in self.strategies.iter_mut() {
            if let Err(e) = handler.on_start().await {
                error!("{} failed to start: {}", handler.name(), e);
            }
        }
        info!(
            "Dispatcher started: {} strategy, {} policy modules",
            self.strategies.len(),
            self.policies.len()
        );
    }

    pub async fn stop(&mut self) {
        for handler in self.strategies.iter_mut() {
            if let Err(e) = handler.on_stop().await {
                error!("{} failed to stop: {}", handler.name(), e);
            }
        }
        info!("Dispatcher stopped after {} events", self.delivered);
    }

    /// Deliver one event and apply the resulting policy decisions.
    pub async fn dispatch(&mut self, event: &OmsEvent) -> Vec<PolicyDecision> {
        let mut decisions = Vec::new();
        for policy in self.policies.iter_mut() {
            let decision = match event {
                OmsEvent::Order(order) => policy.on_order(order),
                OmsEvent::Sniffer(sniffer) => policy.on_sniffer(sniffer),
                OmsEvent::Timer(timer) => policy.on_timer(timer),
                OmsEvent::Earning(earning) => policy.on_earning(earning),
                OmsEvent::Signal(_) => None,
            };
            if let Some(decision) = decision {
                debug!("{} decided {:?}", policy.name(), decision);
                decisions.push((policy.name().to_string(), decision));
            }
        }

        let label = event.label();
        for handler in self.strategies.iter_mut() {
            let result = match event {
                OmsEvent::Signal(signal) => handler.on_signal(signal).await,
                OmsEvent::Order(order) => handler.on_order(order).await,
                OmsEvent::Sniffer(sniffer) => handler.on_sniffer(sniffer).await,
                OmsEvent::Timer(timer) => handler.on_timer(timer).await,
                OmsEvent::Earning(_) => Ok(()),
            };
            if let Err(e) = result {
                error!("{} failed on {} event: {}", handler.name(), label, e);
            }
        }
        self.delivered += 1;

        for (policy, decision) in &decisions {
            self.apply_decision(policy, decision).await;
        }
        decisions.into_iter().map(|(_, decision)| decision).collect()
    }

    async fn apply_decision(&mut self, policy: &str, decision: &PolicyDecision) {
        match decision {
            PolicyDecision::Throttle(ids) => {
                self.throttles.insert(policy.to_string(), ids.clone());
                for handler in self.strategies.iter_mut() {
                    if let Err(e) = handler.on_throttle(ids).await {
                        error!("{} failed on throttle: {}", handler.name(), e);
                    }
                }
                if !ids.is_empty() {
                    warn!("{} throttled strategies: {}", policy, ids.join(", "));
                }
            }
            PolicyDecision::Adjust(multipliers) => {
                for (symbol, multiplier) in multipliers {
                    self.adjustments.insert(symbol.clone(), *multiplier);
                }
            }
        }
    }

    /// Deliver events until `shutdown` resolves or the bus closes, then
    /// drain whatever is already queued.
    pub async fn run<F>(&mut self, events: &mut EventReceiver, shutdown: F) -> usize
    where
        F: Future<Output = ()> + Send,
    {
        self.start().await;
        let before = self.delivered;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        self.dispatch(&event).await;
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    while let Ok(event) = events.try_recv() {
                        self.dispatch(&event).await;
                    }
                    break;
                }
            }
        }

        self.stop().await;
        self.delivered - before
    }

    /// Persist every policy module's status.
    pub fn checkpoint(&self, store: &SqliteStateManager) -> Result<usize> {
        for policy in &self.policies {
            store.save_module_status(policy.name(), policy.kind(), &policy.get_module_status())?;
        }
        Ok(self.policies.len())
    }

    /// Restore policy modules from their latest checkpoints; returns how
    /// many were found.
    pub fn restore(&mut self, store: &SqliteStateManager) -> Result<usize> {
        let mut restored = 0;
        for policy in self.policies.iter_mut() {
            if let Some(checkpoint) = store.load_module_status(policy.name())? {
                policy.set_module_status(checkpoint.status)?;
                info!("{} restored from checkpoint at {}", policy.name(), checkpoint.saved_at);
                restored += 1;
            }
        }
        Ok(restored)
    }
}
