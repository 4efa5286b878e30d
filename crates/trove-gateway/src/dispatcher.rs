use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use trove_types::events::GatewayEvent;

/// A broadcast topic. Item rooms carry chat traffic for one posting; user
/// rooms carry lifecycle notifications addressed to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Item(i64),
    User(i64),
}

/// Explicit subscription registry: room -> set of connection handles.
/// Membership is updated on subscribe/unsubscribe and torn down on
/// disconnect, independent of the persistence layer.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    /// Live connections: conn_id -> sender half of the connection's queue.
    conns: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,

    /// Room membership, both directions so disconnect is O(rooms joined).
    rooms: RwLock<HashMap<Room, HashSet<Uuid>>>,
    memberships: RwLock<HashMap<Uuid, HashSet<Room>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                conns: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                memberships: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection. Returns its id and the receiver the
    /// connection task drains into the socket.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.conns.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Remove a connection from every room and drop its sender.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let joined = self
            .inner
            .memberships
            .write()
            .await
            .remove(&conn_id)
            .unwrap_or_default();

        let mut rooms = self.inner.rooms.write().await;
        for room in joined {
            if let Some(members) = rooms.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
        drop(rooms);

        self.inner.conns.write().await.remove(&conn_id);
    }

    pub async fn join(&self, conn_id: Uuid, room: Room) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(conn_id);
        self.inner
            .memberships
            .write()
            .await
            .entry(conn_id)
            .or_default()
            .insert(room);
    }

    pub async fn leave(&self, conn_id: Uuid, room: Room) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
        drop(rooms);

        if let Some(joined) = self.inner.memberships.write().await.get_mut(&conn_id) {
            joined.remove(&room);
        }
    }

    /// Send a targeted event to one connection.
    pub async fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        if let Some(tx) = self.inner.conns.read().await.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Best-effort fan-out to every member of a room.
    pub async fn publish(&self, room: Room, event: GatewayEvent) {
        self.publish_many(&[room], event).await;
    }

    /// Fan out to the union of several rooms. A connection present in more
    /// than one of them receives the event once.
    pub async fn publish_many(&self, targets: &[Room], event: GatewayEvent) {
        let rooms = self.inner.rooms.read().await;
        let mut recipients: HashSet<Uuid> = HashSet::new();
        for room in targets {
            if let Some(members) = rooms.get(room) {
                recipients.extend(members.iter().copied());
            }
        }
        drop(rooms);

        let conns = self.inner.conns.read().await;
        for conn_id in recipients {
            if let Some(tx) = conns.get(&conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Number of connections currently in a room.
    pub async fn room_size(&self, room: Room) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&room)
            .map_or(0, HashSet::len)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
