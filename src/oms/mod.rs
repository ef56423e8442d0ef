//! Order Management System (OMS)
//!
//! Live-state tracking for exchange orders and conditional triggers:
//! - Orders advance monotonically along the status rank and leave the table
//!   when terminal
//! - Sniffers (target and trailing) follow a shorter rank with optional
//!   retention after termination
//! - One-shot timers, also used for delayed cancellation
//! - [`OrderManager`] ties the tables to the precision engine and connector

pub mod event;
pub mod manager;
pub mod order;
pub mod sniffer;
pub mod timer;

pub use event::{event_bus, EventReceiver, EventSender, OmsEvent, TimerEvent};
pub use manager::{OrderManager, OrderManagerBuilder};
pub use order::{Order, OrderId, OrderRegistry, OrderRequest, UpdateOrderInfo};
pub use sniffer::{Sniffer, SnifferKind, SnifferRegistry, SnifferRequest, UpdateSnifferInfo};
pub use timer::{TimerPayload, TimerService};
