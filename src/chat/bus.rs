//! Broadcast bus: fans events out to connection channels.
//!
//! Each connection owns an unbounded channel drained by its socket task. The
//! bus only knows connection ids; identity lookups happen in the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::web::events::ServerEvent;

/// Opaque connection id.
pub type ConnId = u64;

/// Item delivered to a connection's socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and send.
    Event(ServerEvent),
    /// Close the socket.
    Close,
}

/// Registry of outbound channels.
#[derive(Debug, Default)]
pub struct BroadcastBus {
    senders: RwLock<HashMap<ConnId, UnboundedSender<Outbound>>>,
    next_id: AtomicU64,
}

impl BroadcastBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection id and its outbound channel.
    pub fn register(&self) -> (ConnId, UnboundedReceiver<Outbound>) {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().insert(conn, tx);
        debug!(conn, "Connection registered on bus");
        (conn, rx)
    }

    /// Drop a connection's channel.
    pub fn unregister(&self, conn: ConnId) {
        if self.write().remove(&conn).is_some() {
            debug!(conn, "Connection unregistered from bus");
        }
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Send to one connection. Returns `false` if it is gone.
    pub fn send_to(&self, conn: ConnId, event: ServerEvent) -> bool {
        self.push(conn, Outbound::Event(event))
    }

    /// Send to each listed connection.
    pub fn send_to_many(&self, conns: &[ConnId], event: &ServerEvent) {
        let senders = self.read();
        for conn in conns {
            if let Some(tx) = senders.get(conn) {
                let _ = tx.send(Outbound::Event(event.clone()));
            }
        }
    }

    /// Send to every registered connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        let senders = self.read();
        for tx in senders.values() {
            let _ = tx.send(Outbound::Event(event.clone()));
        }
    }

    /// Ask a connection's socket task to close.
    pub fn close(&self, conn: ConnId) {
        self.push(conn, Outbound::Close);
    }

    fn push(&self, conn: ConnId, item: Outbound) -> bool {
        match self.read().get(&conn) {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnId, UnboundedSender<Outbound>>> {
        self.senders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnId, UnboundedSender<Outbound>>> {
        self.senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(text: &str) -> ServerEvent {
        ServerEvent::system(text)
    }

    #[tokio::test]
    async fn test_register_allocates_distinct_ids() {
        let bus = BroadcastBus::new();
        let (a, _rx_a) = bus.register();
        let (b, _rx_b) = bus.register();
        assert_ne!(a, b);
        assert_eq!(bus.len(), 2);
    }

    #[tokio::test]
    async fn test_send_to() {
        let bus = BroadcastBus::new();
        let (a, mut rx_a) = bus.register();
        let (_b, mut rx_b) = bus.register();

        assert!(bus.send_to(a, system("hi")));
        assert_eq!(rx_a.recv().await, Some(Outbound::Event(system("hi"))));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_and_unregister() {
        let bus = BroadcastBus::new();
        let (a, mut rx_a) = bus.register();
        let (b, mut rx_b) = bus.register();

        bus.broadcast(&system("all"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        bus.unregister(b);
        bus.broadcast(&system("again"));
        assert!(rx_a.try_recv().is_ok());
        assert!(!bus.send_to(b, system("gone")));

        bus.close(a);
        assert_eq!(rx_a.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_send_to_many_skips_unknown() {
        let bus = BroadcastBus::new();
        let (a, mut rx_a) = bus.register();
        bus.send_to_many(&[a, 999], &system("x"));
        assert!(rx_a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver() {
        let bus = BroadcastBus::new();
        let (a, rx_a) = bus.register();
        drop(rx_a);
        assert!(!bus.send_to(a, system("x")));
    }
}
