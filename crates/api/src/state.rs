//! Application state

use std::sync::Arc;

use crate::config::Config;
use crate::store::SupportStore;
use crate::websocket::WebSocketState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SupportStore>,
    pub ws_state: WebSocketState,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(SupportStore::new()),
            ws_state: WebSocketState::new(),
        }
    }
}
