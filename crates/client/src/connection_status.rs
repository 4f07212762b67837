//! Connection status aggregation
//!
//! The server pushes `connection_status_update` whenever a socket attaches or
//! detaches. Those pushes are republished to local subscribers through a watch
//! channel. A one-shot REST pull seeds the value on cold start; it never overwrites
//! a pushed value.

use std::future::Future;
use std::time::Duration;

use supportdesk_shared::{ConnectionStatus, ConnectionStatusUpdate};
use tokio::sync::watch;

use crate::error::{ClientError, ClientResult};

#[derive(Debug)]
pub struct ConnectionStatusAggregator {
    session_id: String,
    tx: watch::Sender<Option<ConnectionStatus>>,
    pushed: bool,
}

impl ConnectionStatusAggregator {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            session_id: session_id.into(),
            tx,
            pushed: false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionStatus>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<ConnectionStatus> {
        *self.tx.borrow()
    }

    /// Apply a server push. Returns true if the published value changed.
    pub fn apply_push(&mut self, update: &ConnectionStatusUpdate) -> bool {
        if update.session_id != self.session_id {
            tracing::debug!(
                session_id = %self.session_id,
                other_session = %update.session_id,
                "Ignoring connection status for another session"
            );
            return false;
        }
        self.pushed = true;
        self.publish(update.connection_status)
    }

    /// Apply the cold-start pull, unless a push already arrived
    pub fn apply_pulled(&mut self, status: ConnectionStatus) -> bool {
        if self.pushed {
            tracing::debug!(session_id = %self.session_id, "Discarding stale connection status pull");
            return false;
        }
        self.publish(status)
    }

    fn publish(&self, status: ConnectionStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == Some(status) {
                false
            } else {
                *current = Some(status);
                true
            }
        })
    }
}

/// Bound a connection status fetch; elapsing maps to `ServiceUnavailable`
pub async fn fetch_with_timeout<F>(fetch: F, timeout: Duration) -> ClientResult<ConnectionStatus>
where
    F: Future<Output = ClientResult<ConnectionStatus>>,
{
    match tokio::time::timeout(timeout, fetch).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::ServiceUnavailable(format!(
            "connection status fetch timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
