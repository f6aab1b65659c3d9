//! Set of open client connections
//!
//! Each client is represented by the sending half of its outbound channel;
//! the socket writer task owns the other half. A closed channel means the
//! client is gone, so such entries are skipped by broadcasts and pruned.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

/// Opaque identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Registry entry for one client
#[derive(Debug)]
pub struct ClientConnection {
    pub tx: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
}

impl ClientConnection {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            connected_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    /// Ordered by id so that broadcast order is stable
    connections: RwLock<BTreeMap<ClientId, ClientConnection>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted client.
    pub async fn add(&self, connection: ClientConnection) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections.write().await.insert(id, connection);
        tracing::debug!(client = %id, "Client registered");
        id
    }

    /// Forget a client. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: ClientId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(client = %id, "Client removed");
        }
        removed
    }

    /// Deliver `payload` to every open client; returns how many received it.
    ///
    /// Closed clients are skipped. A client whose channel rejects the send
    /// is removed.
    pub async fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, conn) in connections.iter() {
                if !conn.is_open() {
                    continue;
                }
                if conn.tx.send(payload.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            tracing::warn!(client = %id, "Failed to send broadcast, dropping client");
            self.remove(id).await;
        }

        tracing::trace!(recipients = delivered, "Broadcast delivered");
        delivered
    }

    /// Deliver `payload` to one client only.
    pub async fn send_to(&self, id: ClientId, payload: &str) -> bool {
        let sent = match self.connections.read().await.get(&id) {
            Some(conn) => conn.tx.send(payload.to_string()).is_ok(),
            None => return false,
        };
        if !sent {
            tracing::warn!(client = %id, "Failed to send reply, dropping client");
            self.remove(id).await;
        }
        sent
    }

    /// Connection time of the longest-connected client
    pub async fn oldest_connected_at(&self) -> Option<DateTime<Utc>> {
        self.connections
            .read()
            .await
            .values()
            .map(|conn| conn.connected_at)
            .min()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
