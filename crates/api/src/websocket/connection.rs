//! WebSocket connection management
//!
//! Represents one participant's socket attached to a session.

use supportdesk_shared::{Envelope, ParticipantRole};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Represents an active session socket
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this socket
    pub connection_id: Uuid,

    /// Session the socket is addressed to
    pub session_id: String,

    pub participant_id: String,

    pub role: ParticipantRole,

    /// Channel to the socket's writer task
    pub sender: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        role: ParticipantRole,
        sender: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            role,
            sender,
        }
    }

    /// Send an envelope to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed envelope
    pub fn send(&self, envelope: Envelope) -> Result<(), mpsc::error::SendError<Envelope>> {
        self.sender.send(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supportdesk_shared::{JoinedSession, Payload};

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new("s1", "c1", ParticipantRole::Customer, tx);

        let envelope = Envelope::new("s1", Payload::JoinedSession(JoinedSession::default()));
        assert!(conn.send(envelope.clone()).is_ok());
        assert_eq!(rx.recv().await, Some(envelope));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new("s1", "a1", ParticipantRole::Agent, tx);
        drop(rx);

        let envelope = Envelope::new("s1", Payload::JoinedSession(JoinedSession::default()));
        assert!(conn.send(envelope).is_err());
    }
}
