//! Live WebSocket connections keyed by client id

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};

use crate::protocol::ServerEvent;

/// A message queued for a connection's send task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// JSON event
    Event(ServerEvent),
    /// Binary WAV audio
    Audio(Vec<u8>),
    /// Keepalive ping
    Ping,
    /// Close the socket
    Close,
}

/// Handle identifying one registered connection
pub type ConnectionId = u64;

type Senders = HashMap<String, Vec<(ConnectionId, mpsc::Sender<Outbound>)>>;

/// Registry of connection senders
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    senders: Arc<RwLock<Senders>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's sender
    pub async fn register(&self, client_id: &str, tx: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders
            .write()
            .await
            .entry(client_id.to_string())
            .or_default()
            .push((id, tx));
        tracing::debug!(client_id, connection = id, "connection registered");
        id
    }

    /// Remove a connection
    pub async fn unregister(&self, client_id: &str, connection: ConnectionId) {
        let mut senders = self.senders.write().await;
        if let Some(list) = senders.get_mut(client_id) {
            list.retain(|(id, _)| *id != connection);
            if list.is_empty() {
                senders.remove(client_id);
            }
        }
        tracing::debug!(client_id, connection, "connection unregistered");
    }

    /// Number of live connections for a client
    pub async fn count(&self, client_id: &str) -> usize {
        self.senders.read().await.get(client_id).map_or(0, Vec::len)
    }

    /// Queue a message on every connection of a client
    ///
    /// Returns how many connections accepted it.
    pub async fn send(&self, client_id: &str, msg: Outbound) -> usize {
        let targets: Vec<mpsc::Sender<Outbound>> = self
            .senders
            .read()
            .await
            .get(client_id)
            .map(|list| list.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for tx in targets {
            if tx.send(msg.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Ask every connection of a client to close and forget them
    pub async fn close(&self, client_id: &str) -> usize {
        let removed = self.senders.write().await.remove(client_id).unwrap_or_default();
        let count = removed.len();
        for (_, tx) in removed {
            let _ = tx.send(Outbound::Close).await;
        }
        if count > 0 {
            tracing::info!(client_id, connections = count, "closed client connections");
        }
        count
    }
}
