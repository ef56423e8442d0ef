//! Internal event bus between the OMS and handler modules
//!
//! The bus is unbounded: producers are the hub's single service loop and
//! the timer driver, both of which must never stall on a slow handler.
//! Backpressure is applied earlier, on the bounded hub inbound queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::oms::order::Order;
use crate::oms::sniffer::Sniffer;
use crate::types::{EarningInfo, Signal};

/// A fired user timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEvent {
    /// Requested fire time
    pub fire_at: f64,
    /// Clock time when the timer was released
    pub fired_at: f64,
    pub event: Value,
}

/// Everything a handler module can be notified of
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OmsEvent {
    Signal(Signal),
    Order(Order),
    Sniffer(Sniffer),
    Timer(TimerEvent),
    Earning(EarningInfo),
}

impl OmsEvent {
    pub fn label(&self) -> &'static str {
        match self {
            OmsEvent::Signal(_) => "signal",
            OmsEvent::Order(_) => "order",
            OmsEvent::Sniffer(_) => "sniffer",
            OmsEvent::Timer(_) => "timer",
            OmsEvent::Earning(_) => "earning",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<OmsEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<OmsEvent>;

/// Create the event bus.
pub fn event_bus() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
