//! In-memory connection for paper mode and tests

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Connection, InboundSender};
use crate::error::{OmsError, Result};

/// Hub side of an in-process connection
#[derive(Debug)]
pub struct ChannelConnection {
    host: String,
    outbound: mpsc::UnboundedSender<String>,
}

/// Remote side of a [`ChannelConnection`]
#[derive(Debug)]
pub struct ChannelPeer {
    host: String,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl ChannelConnection {
    /// Create a connected pair. Dropping the peer makes sends fail.
    pub fn pair(host: impl Into<String>) -> (Arc<Self>, ChannelPeer) {
        let host = host.into();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                host: host.clone(),
                outbound: tx,
            }),
            ChannelPeer { host, outbound: rx },
        )
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn host(&self) -> &str {
        &self.host
    }

    async fn send(&self, msg: &str) -> Result<()> {
        self.outbound
            .send(msg.to_string())
            .map_err(|_| OmsError::Transport {
                host: self.host.clone(),
                reason: "peer closed".to_string(),
            })
    }
}

impl ChannelPeer {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Next message the hub sent to this peer.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a frame from this peer into the hub's inbound queue.
    pub async fn push(&self, inbound: &InboundSender, payload: impl Into<String>) -> Result<()> {
        inbound.push(self.host.clone(), payload).await
    }
}
