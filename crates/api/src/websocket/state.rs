//! Global WebSocket state management
//!
//! Maintains global state for all session sockets and rooms.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::room::RoomManager;

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by connection_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Room manager for session subscriptions
    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    /// Create new WebSocket state
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
        }
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.connection_id, Arc::clone(&conn));

        tracing::info!(
            connection_id = %conn.connection_id,
            session_id = %conn.session_id,
            participant_id = %conn.participant_id,
            role = %conn.role,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection from the registry and every room.
    /// Returns the sessions it had joined.
    pub async fn remove_connection(&self, connection_id: &Uuid) -> Vec<String> {
        let mut connections = self.connections.write().await;
        let Some(conn) = connections.remove(connection_id) else {
            return Vec::new();
        };
        let remaining = connections.len();
        drop(connections);

        let left = self.rooms.remove_connection(connection_id).await;

        tracing::info!(
            connection_id = %connection_id,
            session_id = %conn.session_id,
            participant_id = %conn.participant_id,
            remaining_connections = remaining,
            "WebSocket connection removed"
        );
        left
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the WebSocket state
    pub async fn get_stats(&self) -> WebSocketStats {
        let connection_count = self.connection_count().await;
        let room_count = self.rooms.get_room_count().await;

        WebSocketStats {
            active_connections: connection_count,
            active_rooms: room_count,
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone)]
pub struct WebSocketStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of sessions with at least one joined socket
    pub active_rooms: usize,
}
