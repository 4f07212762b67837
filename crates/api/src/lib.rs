//! SupportDesk API Library
//!
//! This crate contains the realtime session server: REST endpoints, session
//! rooms over WebSocket, and the in-memory session store.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use store::SupportStore;
