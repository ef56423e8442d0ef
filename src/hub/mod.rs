//! Multi-connection event hub
//!
//! Connections are registered by host id. Every connection feeds one shared
//! bounded inbound queue, read by a single consumer through
//! [`ConnectionHub::get_data`]. Outbound messages go to one host
//! ([`ConnectionHub::send_msg`]) or fan out concurrently to all of them
//! ([`ConnectionHub::send_all`]).

pub mod channel;
pub mod protocol;
pub mod service;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{OmsError, Result};

pub use channel::{ChannelConnection, ChannelPeer};
pub use protocol::InboundMessage;
pub use service::OmsService;

/// Default inbound queue capacity
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// Raw frame received from one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub host: String,
    pub payload: String,
}

/// An established transport to one peer
#[async_trait]
pub trait Connection: Send + Sync {
    fn host(&self) -> &str;

    async fn send(&self, msg: &str) -> Result<()>;
}

/// Lifecycle hooks and the service loop run on top of a hub.
///
/// Every method defaults to a no-op.
#[async_trait]
pub trait HubHooks: Send + Sync {
    async fn on_connected(&self, _host: &str) {}

    async fn on_disconnected(&self, _host: &str) {}

    /// Long-running consumer of [`ConnectionHub::get_data`].
    async fn loop_service(&self, _hub: &ConnectionHub) -> Result<()> {
        Ok(())
    }
}

/// No-op hooks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl HubHooks for NoHooks {}

/// Producer handle for the inbound queue
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<InboundFrame>,
}

impl InboundSender {
    /// Enqueue a frame, waiting while the queue is full.
    pub async fn push(&self, host: impl Into<String>, payload: impl Into<String>) -> Result<()> {
        let host = host.into();
        self.tx
            .send(InboundFrame {
                host: host.clone(),
                payload: payload.into(),
            })
            .await
            .map_err(|_| OmsError::Transport {
                host,
                reason: "inbound queue closed".to_string(),
            })
    }
}

pub struct ConnectionHub {
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
    inbound_tx: Mutex<Option<mpsc::Sender<InboundFrame>>>,
    inbound_rx: Mutex<mpsc::Receiver<InboundFrame>>,
    hooks: Arc<dyn HubHooks>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new(capacity: usize, hooks: Arc<dyn HubHooks>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            connections: RwLock::new(HashMap::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(rx),
            hooks,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Producer handle for the inbound queue, `None` once closed.
    pub async fn inbound(&self) -> Option<InboundSender> {
        self.inbound_tx
            .lock()
            .await
            .as_ref()
            .map(|tx| InboundSender { tx: tx.clone() })
    }

    /// Stop handing out producers. `get_data` returns `None` once every
    /// outstanding producer is dropped and the queue is drained.
    pub async fn close_inbound(&self) {
        self.inbound_tx.lock().await.take();
    }

    /// Register a connection and fire `on_connected`.
    ///
    /// A connection with the same host replaces the previous one.
    pub async fn connect(&self, connection: Arc<dyn Connection>) {
        let host = connection.host().to_string();
        let replaced = self
            .connections
            .write()
            .await
            .insert(host.clone(), connection)
            .is_some();
        if replaced {
            warn!("Connection {} replaced", host);
        } else {
            info!("Connection {} registered", host);
        }
        self.hooks.on_connected(&host).await;
    }

    /// Unregister a connection and fire `on_disconnected`.
    pub async fn disconnect(&self, host: &str) -> bool {
        let removed = self.connections.write().await.remove(host).is_some();
        if removed {
            info!("Connection {} removed", host);
            self.hooks.on_disconnected(host).await;
        } else {
            debug!("Disconnect for unknown host {} ignored", host);
        }
        removed
    }

    pub async fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.connections.read().await.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Send to one host. An unknown host is logged and the message dropped.
    pub async fn send_msg(&self, host: &str, msg: &str) -> bool {
        let connection = self.connections.read().await.get(host).cloned();
        let Some(connection) = connection else {
            error!("Send to unknown host {} dropped", host);
            return false;
        };
        match connection.send(msg).await {
            Ok(()) => true,
            Err(e) => {
                error!("Send to {} failed: {}", host, e);
                false
            }
        }
    }

    /// Send to every connection concurrently; returns how many succeeded.
    pub async fn send_all(&self, msg: &str) -> usize {
        let connections: Vec<Arc<dyn Connection>> =
            self.connections.read().await.values().cloned().collect();

        let results = join_all(connections.iter().map(|connection| async move {
            let result = connection.send(msg).await;
            if let Err(e) = &result {
                error!("Broadcast to {} failed: {}", connection.host(), e);
            }
            result.is_ok()
        }))
        .await;

        let delivered = results.into_iter().filter(|ok| *ok).count();
        debug!("Broadcast delivered to {}/{} connections", delivered, connections.len());
        delivered
    }

    /// Next inbound frame, waiting until one is available.
    pub async fn get_data(&self) -> Option<InboundFrame> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Run the hooks' service loop until it returns.
    pub async fn serve(&self) -> Result<()> {
        let hooks = self.hooks.clone();
        hooks.loop_service(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHooks {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    #[async_trait]
    impl HubHooks for CountingHooks {
        async fn on_connected(&self, _host: &str) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnected(&self, _host: &str) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_connect_disconnect_fire_hooks() {
        let hooks = Arc::new(CountingHooks::default());
        let hub = ConnectionHub::new(8, hooks.clone());
        let (conn, _peer) = ChannelConnection::pair("exchange-a");
        hub.connect(conn).await;
        assert_eq!(hub.hosts().await, vec!["exchange-a".to_string()]);

        assert!(hub.disconnect("exchange-a").await);
        assert!(!hub.disconnect("exchange-a").await);
        assert_eq!(hooks.connected.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_msg_to_unknown_host_is_dropped() {
        let hub = ConnectionHub::new(8, Arc::new(NoHooks));
        assert!(!hub.send_msg("nobody", "ping").await);
    }

    #[tokio::test]
    async fn test_send_msg_reaches_peer() {
        let hub = ConnectionHub::new(8, Arc::new(NoHooks));
        let (conn, mut peer) = ChannelConnection::pair("a");
        hub.connect(conn).await;
        assert!(hub.send_msg("a", "hello").await);
        assert_eq!(peer.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_send_all_survives_one_failed_connection() {
        let hub = ConnectionHub::new(8, Arc::new(NoHooks));
        let (a, mut peer_a) = ChannelConnection::pair("a");
        let (b, peer_b) = ChannelConnection::pair("b");
        let (c, mut peer_c) = ChannelConnection::pair("c");
        hub.connect(a).await;
        hub.connect(b).await;
        hub.connect(c).await;
        drop(peer_b);

        assert_eq!(hub.send_all("tick").await, 2);
        assert_eq!(peer_a.recv().await, Some("tick".to_string()));
        assert_eq!(peer_c.recv().await, Some("tick".to_string()));
    }

    #[tokio::test]
    async fn test_get_data_waits_for_frame() {
        let hub = Arc::new(ConnectionHub::new(8, Arc::new(NoHooks)));
        let inbound = hub.inbound().await.unwrap();

        let reader = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.get_data().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        inbound.push("a", "{}").await.unwrap();
        let frame = reader.await.unwrap().unwrap();
        assert_eq!(frame.host, "a");
        assert_eq!(frame.payload, "{}");
    }

    #[tokio::test]
    async fn test_inbound_queue_is_bounded() {
        let hub = ConnectionHub::new(2, Arc::new(NoHooks));
        let inbound = hub.inbound().await.unwrap();
        inbound.push("a", "1").await.unwrap();
        inbound.push("a", "2").await.unwrap();

        let third = tokio::time::timeout(Duration::from_millis(30), inbound.push("a", "3")).await;
        assert!(third.is_err());

        assert_eq!(hub.get_data().await.unwrap().payload, "1");
        inbound.push("a", "3").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_inbound_ends_reader_after_drain() {
        let hub = ConnectionHub::new(4, Arc::new(NoHooks));
        let inbound = hub.inbound().await.unwrap();
        inbound.push("a", "last").await.unwrap();
        drop(inbound);
        hub.close_inbound().await;

        assert!(hub.inbound().await.is_none());
        assert_eq!(hub.get_data().await.unwrap().payload, "last");
        assert!(hub.get_data().await.is_none());
    }
}
