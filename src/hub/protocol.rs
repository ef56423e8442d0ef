//! Inbound frame format
//!
//! Frames are JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "order", "order_id": "...", "status": "partial_filled",
//!  "last_timestamp": 1700000000.5, "local_timestamp": 1700000000.6,
//!  "execute_price": 64000.0, "execute_amount": 0.4}
//! {"type": "sniffer", "order_id": "...", "status": "triggered", ...}
//! {"type": "signal", "batch_id": "...", "symbol": "btc_usdt|binance", ...}
//! {"type": "batch_signal", "batch_id": "...", "symbols": [...], ...}
//! {"type": "earning", "batch_id": "...", "strategy_id": "...", ...}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::oms::order::{OrderId, UpdateOrderInfo};
use crate::oms::sniffer::UpdateSnifferInfo;
use crate::types::{BatchSignal, EarningInfo, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Order {
        order_id: OrderId,
        #[serde(flatten)]
        update: UpdateOrderInfo,
    },
    Sniffer {
        order_id: OrderId,
        #[serde(flatten)]
        update: UpdateSnifferInfo,
    },
    Signal(Signal),
    BatchSignal(BatchSignal),
    Earning(EarningInfo),
}

impl InboundMessage {
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
