//! Connection registry
//!
//! Tracks every live wire, dual-indexed by group and by user, under a
//! single reader-writer lock. Getters return copies so callers iterate
//! without holding the lock. Each connection owns a bounded write queue and
//! its private `last_tree`; a queue that stays full past the write timeout
//! evicts the connection instead of blocking the sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::action::ServerFrame;
use crate::error::{RegistryError, SendError};
use crate::tree::Node;

/// One live wire between server and client.
pub struct Connection {
    id: Uuid,
    group: String,
    user: String,
    sender: mpsc::Sender<ServerFrame>,
    write_timeout: Duration,
    last_tree: Mutex<Option<Node>>,
}

impl Connection {
    /// Create a connection with its bounded write queue. The returned
    /// receiver is the wire side: the transport drains it onto the socket.
    pub fn new(
        group: impl Into<String>,
        user: impl Into<String>,
        queue: usize,
        write_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<ServerFrame>) {
        let (sender, receiver) = mpsc::channel(queue.max(1));
        let connection = Arc::new(Connection {
            id: Uuid::new_v4(),
            group: group.into(),
            user: user.into(),
            sender,
            write_timeout,
            last_tree: Mutex::new(None),
        });
        (connection, receiver)
    }

    /// Unique connection ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session group this wire belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The authenticated user, or `""` for anonymous.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Queue a frame for the wire.
    ///
    /// Backpressure policy: if the queue stays full past the write timeout
    /// the send fails, and the caller unregisters the connection; one slow
    /// consumer never blocks the rest of its group.
    pub async fn send(&self, frame: ServerFrame) -> Result<(), SendError> {
        self.sender
            .send_timeout(frame, self.write_timeout)
            .await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Timeout(_) => SendError::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }

    /// Run `f` with exclusive access to this connection's previous tree.
    ///
    /// The tree is private to the connection: every patch is computed
    /// against it and it is replaced under the same lock, so concurrent
    /// fan-outs to one wire serialise here.
    pub async fn with_last_tree<R>(&self, f: impl FnOnce(&mut Option<Node>) -> R) -> R {
        let mut guard = self.last_tree.lock().await;
        f(&mut guard)
    }
}

#[derive(Default)]
struct Indexes {
    by_group: HashMap<String, Vec<Arc<Connection>>>,
    by_user: HashMap<String, Vec<Arc<Connection>>>,
    total: usize,
}

/// Process-wide set of live connections.
pub struct ConnectionRegistry {
    indexes: RwLock<Indexes>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry capped at `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        ConnectionRegistry {
            indexes: RwLock::new(Indexes::default()),
            max_connections,
        }
    }

    /// Add a connection to both indices.
    ///
    /// Returns [`RegistryError::Full`] once the cap is reached; the
    /// transport answers such upgrades with 503.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let mut indexes = self.indexes.write();
        if indexes.total >= self.max_connections {
            return Err(RegistryError::Full(self.max_connections));
        }
        indexes
            .by_group
            .entry(connection.group().to_string())
            .or_default()
            .push(connection.clone());
        indexes
            .by_user
            .entry(connection.user().to_string())
            .or_default()
            .push(connection.clone());
        indexes.total += 1;
        tracing::debug!(
            connection = %connection.id(),
            group = connection.group(),
            "connection registered"
        );
        Ok(())
    }

    /// Remove a connection from both indices. Idempotent.
    pub fn unregister(&self, connection: &Connection) {
        let mut indexes = self.indexes.write();
        let mut removed = false;
        if let Some(members) = indexes.by_group.get_mut(connection.group()) {
            let before = members.len();
            members.retain(|c| c.id() != connection.id());
            removed = members.len() < before;
            if members.is_empty() {
                indexes.by_group.remove(connection.group());
            }
        }
        if let Some(members) = indexes.by_user.get_mut(connection.user()) {
            members.retain(|c| c.id() != connection.id());
            if members.is_empty() {
                indexes.by_user.remove(connection.user());
            }
        }
        if removed {
            indexes.total -= 1;
            tracing::debug!(connection = %connection.id(), "connection unregistered");
        }
    }

    /// A connection by ID, if registered.
    pub fn get(&self, id: Uuid) -> Option<Arc<Connection>> {
        self.indexes
            .read()
            .by_group
            .values()
            .flatten()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Copy of the group's membership.
    pub fn get_by_group(&self, group: &str) -> Vec<Arc<Connection>> {
        self.indexes
            .read()
            .by_group
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of one user's connections across groups.
    pub fn get_by_user(&self, user: &str) -> Vec<Arc<Connection>> {
        self.indexes
            .read()
            .by_user
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of every live connection.
    pub fn get_all(&self) -> Vec<Arc<Connection>> {
        self.indexes.read().by_group.values().flatten().cloned().collect()
    }

    /// Total number of live connections.
    pub fn count(&self) -> usize {
        self.indexes.read().total
    }

    /// Number of connections in one group.
    pub fn group_count(&self, group: &str) -> usize {
        self.indexes
            .read()
            .by_group
            .get(group)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of connections for one user.
    pub fn user_count(&self, user: &str) -> usize {
        self.indexes
            .read()
            .by_user
            .get(user)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(group: &str, user: &str) -> (Arc<Connection>, mpsc::Receiver<ServerFrame>) {
        Connection::new(group, user, 8, Duration::from_millis(50))
    }

    #[test]
    fn test_register_indexes_both_ways() {
        let registry = ConnectionRegistry::new(10);
        let (a, _rx_a) = connection("g1", "alice");
        let (b, _rx_b) = connection("g1", "");
        let (c, _rx_c) = connection("g2", "alice");
        registry.register(a.clone()).unwrap();
        registry.register(b).unwrap();
        registry.register(c).unwrap();

        assert_eq!(registry.count(), 3);
        assert_eq!(registry.group_count("g1"), 2);
        assert_eq!(registry.group_count("g2"), 1);
        assert_eq!(registry.user_count("alice"), 2);
        assert_eq!(registry.user_count(""), 1);
        assert!(registry.get(a.id()).is_some());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new(10);
        let (a, _rx) = connection("g1", "");
        registry.register(a.clone()).unwrap();
        registry.unregister(&a);
        registry.unregister(&a);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.group_count("g1"), 0);
    }

    #[test]
    fn test_capacity_cap() {
        let registry = ConnectionRegistry::new(1);
        let (a, _rx_a) = connection("g1", "");
        let (b, _rx_b) = connection("g1", "");
        registry.register(a).unwrap();
        assert!(matches!(registry.register(b), Err(RegistryError::Full(1))));
    }

    #[tokio::test]
    async fn test_send_times_out_when_queue_full() {
        let (conn, mut rx) = Connection::new("g1", "", 1, Duration::from_millis(10));
        conn.send(ServerFrame::Ping { t: 1 }).await.unwrap();
        // Queue of one is now full and nothing drains it.
        assert!(conn.send(ServerFrame::Ping { t: 2 }).await.is_err());
        assert_eq!(rx.recv().await, Some(ServerFrame::Ping { t: 1 }));
    }
}
