//! OMS service loop: inbound frames to table updates and handler events

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::protocol::InboundMessage;
use super::{ConnectionHub, HubHooks, InboundFrame};
use crate::error::Result;
use crate::oms::event::{EventSender, OmsEvent};
use crate::oms::OrderManager;

/// Routes decoded frames into the [`OrderManager`] and publishes every
/// accepted snapshot on the event bus.
pub struct OmsService {
    manager: Arc<OrderManager>,
    events: EventSender,
}

impl OmsService {
    pub fn new(manager: Arc<OrderManager>, events: EventSender) -> Self {
        Self { manager, events }
    }

    pub fn manager(&self) -> &Arc<OrderManager> {
        &self.manager
    }

    /// Decode and apply one frame; returns the number of events published.
    pub async fn handle_frame(&self, frame: &InboundFrame) -> usize {
        let message = match InboundMessage::decode(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed frame from {} skipped: {}", frame.host, e);
                return 0;
            }
        };
        self.handle_message(message).await
    }

    pub async fn handle_message(&self, message: InboundMessage) -> usize {
        match message {
            InboundMessage::Order { order_id, update } => {
                match self.manager.update_order_info(&order_id, &update).await {
                    Some(order) => self.publish(OmsEvent::Order(order)),
                    None => 0,
                }
            }
            InboundMessage::Sniffer { order_id, update } => {
                match self.manager.update_sniffer_info(&order_id, &update).await {
                    Some(sniffer) => self.publish(OmsEvent::Sniffer(sniffer)),
                    None => 0,
                }
            }
            InboundMessage::Signal(signal) => self.publish(OmsEvent::Signal(signal.rounded())),
            InboundMessage::BatchSignal(batch) => batch
                .signals()
                .into_iter()
                .map(|signal| self.publish(OmsEvent::Signal(signal)))
                .sum(),
            InboundMessage::Earning(earning) => self.publish(OmsEvent::Earning(earning.rounded())),
        }
    }

    fn publish(&self, event: OmsEvent) -> usize {
        let label = event.label();
        match self.events.send(event) {
            Ok(()) => 1,
            Err(_) => {
                warn!("No event consumer, {} event dropped", label);
                0
            }
        }
    }
}

#[async_trait]
impl HubHooks for OmsService {
    async fn on_connected(&self, host: &str) {
        info!("Peer {} connected", host);
    }

    async fn on_disconnected(&self, host: &str) {
        info!("Peer {} disconnected", host);
    }

    async fn loop_service(&self, hub: &ConnectionHub) -> Result<()> {
        let mut frames = 0usize;
        let mut published = 0usize;
        while let Some(frame) = hub.get_data().await {
            frames += 1;
            published += self.handle_frame(&frame).await;
        }
        debug!(
            "Service loop finished: {} frames, {} events published",
            frames, published
        );
        Ok(())
    }
}
