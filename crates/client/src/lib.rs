//! SupportDesk realtime session client
//!
//! Keeps a chat session's message log, typing state, lifecycle status, connection
//! status and the agent's presence consistent with the server across a long-lived,
//! unreliable WebSocket connection.
//!
//! The entry point is [`SessionView::open`], which returns the view handle and a
//! stream of [`ViewEvent`]s for the rendering layer. Agents additionally run a
//! [`HeartbeatService`].

pub mod config;
pub mod connection;
pub mod connection_status;
pub mod error;
pub mod message_log;
pub mod presence;
pub mod rest;
pub mod session_state;
pub mod sync;
pub mod typing;
pub mod view;

pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionTarget};
pub use connection_status::{fetch_with_timeout, ConnectionStatusAggregator};
pub use error::{ClientError, ClientResult};
pub use message_log::{MergeOutcome, MessageLog, DEDUP_WINDOW};
pub use presence::{
    restore_status, FilePresenceStore, HeartbeatConfig, HeartbeatErrorCallback, HeartbeatService,
    MemoryPresenceStore, PresenceStore,
};
pub use rest::{PresenceApi, RestClient};
pub use session_state::{SessionStateMachine, Transition};
pub use sync::{SessionSync, ViewEvent};
pub use typing::{TypingCoordinator, TypingPhase};
pub use view::{Participant, SessionView, ViewSnapshot};
