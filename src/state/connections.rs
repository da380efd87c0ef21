//! Transport connections and their binding to logical players.

use std::time::Duration;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::{sync::mpsc, time::Instant};
use uuid::Uuid;

/// Handle used to push frames to a connected client.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Opaque connection id.
    pub id: Uuid,
    /// Outbound frame queue drained by the socket's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
    /// Player represented by this connection, once joined.
    pub player_id: Option<String>,
    /// Room the bound player belongs to.
    pub room_code: Option<String>,
    /// Last sign of life from the client.
    pub last_heartbeat: Instant,
    /// Connect time in epoch milliseconds.
    pub connected_at: u64,
}

/// Player id and room code a connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Bound player.
    pub player_id: String,
    /// Room of the bound player.
    pub room_code: String,
}

/// Process-wide registry of live connections and of the room each player lives in.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Connection>,
    player_rooms: DashMap<String, String>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh, unbound connection.
    pub fn register(&self, tx: mpsc::UnboundedSender<Message>) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                id,
                tx,
                player_id: None,
                room_code: None,
                last_heartbeat: Instant::now(),
                connected_at: crate::dto::now_ms(),
            },
        );
        id
    }

    /// Drop a connection, returning it if it was still registered.
    pub fn unregister(&self, id: &Uuid) -> Option<Connection> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    /// Whether the connection is still registered.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.connections.contains_key(id)
    }

    /// Player binding of a connection, if any.
    pub fn binding(&self, id: &Uuid) -> Option<Binding> {
        let connection = self.connections.get(id)?;
        match (&connection.player_id, &connection.room_code) {
            (Some(player_id), Some(room_code)) => Some(Binding {
                player_id: player_id.clone(),
                room_code: room_code.clone(),
            }),
            _ => None,
        }
    }

    /// Bind a connection to a player. Returns false if the connection is gone.
    pub fn bind(&self, id: &Uuid, player_id: &str, room_code: &str) -> bool {
        let Some(mut connection) = self.connections.get_mut(id) else {
            return false;
        };
        connection.player_id = Some(player_id.to_string());
        connection.room_code = Some(room_code.to_string());
        drop(connection);
        self.player_rooms
            .insert(player_id.to_string(), room_code.to_string());
        true
    }

    /// Clear the player binding of a connection, keeping the connection open.
    pub fn unbind(&self, id: &Uuid) {
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.player_id = None;
            connection.room_code = None;
        }
    }

    /// Room a player currently lives in.
    pub fn player_room(&self, player_id: &str) -> Option<String> {
        self.player_rooms
            .get(player_id)
            .map(|entry| entry.value().clone())
    }

    /// Forget the room of a removed player.
    pub fn forget_player(&self, player_id: &str) {
        self.player_rooms.remove(player_id);
    }

    /// Record a sign of life.
    pub fn touch(&self, id: &Uuid) {
        if let Some(mut connection) = self.connections.get_mut(id) {
            connection.last_heartbeat = Instant::now();
        }
    }

    /// Outbound queue of a connection.
    pub fn sender(&self, id: &Uuid) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.get(id).map(|connection| connection.tx.clone())
    }

    /// Every live connection's id and outbound queue.
    pub fn senders(&self) -> Vec<(Uuid, mpsc::UnboundedSender<Message>)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), entry.tx.clone()))
            .collect()
    }

    /// Connections whose last heartbeat is older than `timeout`.
    pub fn stale(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        self.connections
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_unbind_round_trip() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);

        assert_eq!(registry.binding(&id), None);
        assert!(registry.bind(&id, "p1", "123"));
        assert_eq!(
            registry.binding(&id),
            Some(Binding {
                player_id: "p1".into(),
                room_code: "123".into()
            })
        );
        assert_eq!(registry.player_room("p1").as_deref(), Some("123"));

        registry.unbind(&id);
        assert_eq!(registry.binding(&id), None);
        assert!(registry.contains(&id));
    }

    #[test]
    fn bind_fails_for_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.bind(&Uuid::new_v4(), "p1", "123"));
        assert_eq!(registry.player_room("p1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_connections_are_reported() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let quiet = registry.register(tx.clone());
        let chatty = registry.register(tx);

        tokio::time::advance(Duration::from_secs(40)).await;
        registry.touch(&chatty);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.stale(Duration::from_secs(60)), vec![quiet]);
    }
}
