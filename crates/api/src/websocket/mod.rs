//! WebSocket support for live sessions
//!
//! Provides the realtime side of a support session:
//! - Session rooms joined with `join_session`
//! - Typing indicator relay between participants
//! - Message, status and connection-count broadcasts
//!
//! # Architecture
//!
//! - **Connection**: One participant socket bound to a session
//! - **Room**: Session-based pub/sub for broadcasting envelopes
//! - **State**: Global WebSocket state shared across all connections
//! - **Handler**: Axum WebSocket route handler

pub mod connection;
pub mod handler;
pub mod room;
pub mod state;

pub use handler::{broadcast_connection_status, ws_handler};
pub use state::WebSocketState;
