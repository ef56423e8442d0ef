//! Algorithmic trading order management
//!
//! Order and conditional-trigger management for a pluggable trading
//! pipeline: live order/sniffer state machines, precision-aware price and
//! amount quantization, one-shot timers, and an async multi-connection hub
//! that feeds exchange updates to strategy and policy modules.

pub mod config;
pub mod connector;
pub mod data;
pub mod error;
pub mod handler;
pub mod hub;
pub mod oms;
pub mod policy;
pub mod precision;
pub mod state_manager;
pub mod types;

pub use config::Config;
pub use error::{OmsError, Result};
pub use oms::{OrderManager, OrderManagerBuilder};
pub use precision::PrecisionEngine;
pub use types::*;
