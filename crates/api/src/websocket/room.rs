//! Session room management for pub/sub
//!
//! Manages session "rooms" for broadcasting envelopes to every attached socket.

use std::collections::HashMap;
use std::sync::Arc;

use supportdesk_shared::{ConnectionStatus, Envelope, ParticipantRole};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;

/// Manages session "rooms" for broadcasting envelopes
pub struct RoomManager {
    /// Map of session_id -> list of joined connections
    rooms: Arc<RwLock<HashMap<String, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a session room. Returns false if it was already there.
    pub async fn join(&self, session_id: &str, conn: Arc<Connection>) -> bool {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(session_id.to_string()).or_default();
        if room.iter().any(|c| c.connection_id == conn.connection_id) {
            return false;
        }
        room.push(Arc::clone(&conn));

        tracing::debug!(
            session_id = %session_id,
            connection_id = %conn.connection_id,
            room_size = room.len(),
            "Connection joined session room"
        );
        true
    }

    /// Broadcast an envelope to all connections in a session room
    ///
    /// Silently ignores send errors (closed connections will be cleaned up)
    pub async fn broadcast(&self, session_id: &str, envelope: Envelope) {
        self.send_to_room(session_id, None, envelope).await;
    }

    /// Broadcast to every connection in the room except `connection_id`
    pub async fn broadcast_except(&self, session_id: &str, connection_id: &Uuid, envelope: Envelope) {
        self.send_to_room(session_id, Some(connection_id), envelope).await;
    }

    async fn send_to_room(&self, session_id: &str, skip: Option<&Uuid>, envelope: Envelope) {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(session_id) else {
            tracing::debug!(
                session_id = %session_id,
                kind = envelope.kind(),
                "No room found for session - no subscribers"
            );
            return;
        };

        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in conns.iter().filter(|c| Some(&c.connection_id) != skip) {
            match conn.send(envelope.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        connection_id = %conn.connection_id,
                        "Failed to send envelope to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            session_id = %session_id,
            kind = envelope.kind(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast envelope to session room"
        );
    }

    /// Remove a connection from all rooms, returning the sessions it was in
    pub async fn remove_connection(&self, connection_id: &Uuid) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = Vec::new();

        for (session_id, conns) in rooms.iter_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.connection_id != *connection_id);
            if conns.len() < before_len {
                removed_from.push(session_id.clone());
            }
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());

        if !removed_from.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                session_count = removed_from.len(),
                "Removed connection from rooms"
            );
        }
        removed_from
    }

    /// Count joined sockets per role
    pub async fn connection_status(&self, session_id: &str) -> ConnectionStatus {
        let rooms = self.rooms.read().await;
        let (customers, agents) = rooms
            .get(session_id)
            .map(|conns| {
                conns.iter().fold((0u32, 0u32), |(c, a), conn| match conn.role {
                    ParticipantRole::Customer => (c + 1, a),
                    ParticipantRole::Agent => (c, a + 1),
                })
            })
            .unwrap_or((0, 0));
        ConnectionStatus::from_counts(customers, agents)
    }

    pub async fn contains(&self, session_id: &str, connection_id: &Uuid) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(session_id)
            .is_some_and(|conns| conns.iter().any(|c| c.connection_id == *connection_id))
    }

    /// Get room size (number of connections) for a session
    pub async fn get_room_size(&self, session_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(session_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
