//! One-shot timers driven by the connector clock
//!
//! A single driver task owns a min-heap keyed by `(fire_at, seq)`. Timers
//! are never cancelable. Besides user events the same heap carries delayed
//! cancellation requests, so a `cancel_order(id, delay)` is released in
//! exactly the same order as any other timer.

use ordered_float::OrderedFloat;
use serde_json::Value;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::connector::Connector;
use crate::error::{OmsError, Result};
use crate::oms::event::{EventSender, OmsEvent, TimerEvent};
use crate::oms::order::OrderId;
use crate::types::round_timestamp;

/// Upper bound on how long the driver sleeps before re-reading the clock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What a timer does when it fires
#[derive(Debug, Clone, PartialEq)]
pub enum TimerPayload {
    /// Delivered to handlers as [`OmsEvent::Timer`]
    Event(Value),
    CancelOrder(OrderId),
    CancelSniffer(OrderId),
}

#[derive(Debug)]
struct Scheduled {
    fire_at: OrderedFloat<f64>,
    seq: u64,
    payload: TimerPayload,
}

impl Scheduled {
    fn key(&self) -> (OrderedFloat<f64>, u64) {
        (self.fire_at, self.seq)
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

/// Handle to the timer driver task
#[derive(Debug)]
pub struct TimerService {
    tx: mpsc::UnboundedSender<Scheduled>,
    seq: AtomicU64,
    driver: JoinHandle<()>,
}

impl TimerService {
    /// Spawn the driver on the current tokio runtime.
    pub fn spawn(
        clock: Arc<dyn Connector>,
        events: EventSender,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(clock, events, rx, poll_interval));
        Self {
            tx,
            seq: AtomicU64::new(0),
            driver,
        }
    }

    /// Schedule `event` for delivery at or after `fire_at`.
    pub fn place_timer(&self, fire_at: f64, event: Value) -> Result<u64> {
        self.schedule(fire_at, TimerPayload::Event(event))
    }

    pub fn schedule(&self, fire_at: f64, payload: TimerPayload) -> Result<u64> {
        if !fire_at.is_finite() {
            return Err(OmsError::Validation(format!(
                "timer fire time must be finite, got {}",
                fire_at
            )));
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(Scheduled {
                fire_at: OrderedFloat(round_timestamp(fire_at)),
                seq,
                payload,
            })
            .map_err(|_| OmsError::TimerStopped)?;
        Ok(seq)
    }

    pub fn is_running(&self) -> bool {
        !self.driver.is_finished()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    clock: Arc<dyn Connector>,
    events: EventSender,
    mut rx: mpsc::UnboundedReceiver<Scheduled>,
    poll_interval: Duration,
) {
    let mut heap: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();

    loop {
        let now = clock.get_current_timestamp();
        while heap
            .peek()
            .is_some_and(|Reverse(next)| next.fire_at.0 <= now)
        {
            if let Some(Reverse(due)) = heap.pop() {
                fire(clock.as_ref(), &events, due, now).await;
            }
        }

        let wait = heap.peek().map(|Reverse(next)| {
            let secs = (next.fire_at.0 - now).max(0.0);
            Duration::from_secs_f64(secs).min(poll_interval)
        });

        match wait {
            Some(wait) => {
                tokio::select! {
                    incoming = rx.recv() => match incoming {
                        Some(scheduled) => heap.push(Reverse(scheduled)),
                        None => break,
                    },
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            None => match rx.recv().await {
                Some(scheduled) => heap.push(Reverse(scheduled)),
                None => break,
            },
        }
    }

    if !heap.is_empty() {
        debug!("Timer driver stopped with {} unfired timers", heap.len());
    }
}

async fn fire(clock: &dyn Connector, events: &EventSender, due: Scheduled, now: f64) {
    match due.payload {
        TimerPayload::Event(event) => {
            let timer = TimerEvent {
                fire_at: due.fire_at.0,
                fired_at: round_timestamp(now),
                event,
            };
            if events.send(OmsEvent::Timer(timer)).is_err() {
                warn!("Timer {} fired with no event consumer", due.seq);
            }
        }
        TimerPayload::CancelOrder(order_id) => {
            debug!("Delayed cancel for order {}", order_id);
            if let Err(e) = clock.cancel_order(&order_id).await {
                error!("Delayed cancel for order {} failed: {}", order_id, e);
            }
        }
        TimerPayload::CancelSniffer(order_id) => {
            debug!("Delayed cancel for sniffer {}", order_id);
            if let Err(e) = clock.cancel_sniffer(&order_id).await {
                error!("Delayed cancel for sniffer {} failed: {}", order_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::PaperConnector;
    use crate::oms::event::event_bus;
    use serde_json::json;

    fn service(start: f64) -> (Arc<PaperConnector>, TimerService, crate::oms::event::EventReceiver) {
        let clock = Arc::new(PaperConnector::with_manual_clock(0.0, start));
        let (tx, rx) = event_bus();
        let timers = TimerService::spawn(clock.clone(), tx, Duration::from_millis(5));
        (clock, timers, rx)
    }

    async fn next_timer(rx: &mut crate::oms::event::EventReceiver) -> TimerEvent {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(OmsEvent::Timer(timer))) => timer,
            other => panic!("expected timer event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timer_not_released_before_fire_at() {
        let (clock, timers, mut rx) = service(100.0);
        timers.place_timer(105.0, json!({"k": 1})).unwrap();

        let early = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(early.is_err());

        clock.set_time(105.0);
        let timer = next_timer(&mut rx).await;
        assert_eq!(timer.event, json!({"k": 1}));
        assert!(timer.fired_at >= timer.fire_at);
    }

    /// Clock reporting an unrounded exchange time
    struct RawClock(f64);

    #[async_trait::async_trait]
    impl Connector for RawClock {
        fn get_current_timestamp(&self) -> f64 {
            self.0
        }

        async fn get_current_price(&self, _symbol: &crate::types::Symbol) -> Result<f64> {
            Ok(0.0)
        }

        async fn get_batch_price(
            &self,
            _symbol: &crate::types::Symbol,
            _start_ts: f64,
            _end_ts: f64,
        ) -> Result<Vec<crate::types::TradeTick>> {
            Ok(Vec::new())
        }

        async fn get_trading_cash(&self, _symbol: &crate::types::Symbol) -> Result<f64> {
            Ok(0.0)
        }

        async fn submit_order(&self, _order: &crate::oms::order::Order) -> Result<()> {
            Ok(())
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }

        async fn submit_sniffer(&self, _sniffer: &crate::oms::sniffer::Sniffer) -> Result<()> {
            Ok(())
        }

        async fn cancel_sniffer(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fired_at_rounded_to_micros() {
        let (tx, mut rx) = event_bus();
        let timers = TimerService::spawn(Arc::new(RawClock(105.123_456_789)), tx, Duration::from_millis(5));
        timers.place_timer(105.0, json!(null)).unwrap();

        let timer = next_timer(&mut rx).await;
        assert_eq!(timer.fired_at, 105.123457);
        assert_eq!(timer.fire_at, 105.0);
    }

    #[tokio::test]
    async fn test_timers_released_in_fire_order() {
        let (clock, timers, mut rx) = service(0.0);
        timers.place_timer(3.0, json!("c")).unwrap();
        timers.place_timer(1.0, json!("a")).unwrap();
        timers.place_timer(2.0, json!("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.set_time(10.0);

        let order: Vec<Value> = vec![
            next_timer(&mut rx).await.event,
            next_timer(&mut rx).await.event,
            next_timer(&mut rx).await.event,
        ];
        assert_eq!(order, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn test_same_fire_time_keeps_placement_order() {
        let (clock, timers, mut rx) = service(0.0);
        for i in 0..5 {
            timers.place_timer(1.0, json!(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.set_time(1.0);

        for i in 0..5 {
            assert_eq!(next_timer(&mut rx).await.event, json!(i));
        }
    }

    #[tokio::test]
    async fn test_past_timer_fires_immediately() {
        let (_clock, timers, mut rx) = service(50.0);
        timers.place_timer(10.0, json!("late")).unwrap();
        assert_eq!(next_timer(&mut rx).await.event, json!("late"));
    }

    #[tokio::test]
    async fn test_delayed_cancel_reaches_connector() {
        let (clock, timers, _rx) = service(0.0);
        timers
            .schedule(1.0, TimerPayload::CancelOrder("ord-1".to_string()))
            .unwrap();
        timers
            .schedule(1.0, TimerPayload::CancelSniffer("snf-1".to_string()))
            .unwrap();
        clock.set_time(2.0);

        let mut journal = clock.journal().await;
        for _ in 0..100 {
            if !journal.order_cancels.is_empty() && !journal.sniffer_cancels.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            journal = clock.journal().await;
        }
        assert_eq!(journal.order_cancels, vec!["ord-1".to_string()]);
        assert_eq!(journal.sniffer_cancels, vec!["snf-1".to_string()]);
    }

    #[tokio::test]
    async fn test_non_finite_fire_time_rejected() {
        let (_clock, timers, _rx) = service(0.0);
        assert!(timers.place_timer(f64::NAN, json!(null)).is_err());
        assert!(timers.is_running());
    }
}
