//! Session lifecycle state machine (`waiting -> active -> closed`)

use supportdesk_shared::{ParticipantRole, SessionStatus};

use crate::error::{ClientError, ClientResult};

/// Result of applying an event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Changed { from: SessionStatus, to: SessionStatus },
    /// The event tried to leave the terminal `closed` state
    Rejected { requested: SessionStatus },
}

impl Transition {
    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    session_id: String,
    status: SessionStatus,
}

impl SessionStateMachine {
    pub fn new(session_id: impl Into<String>, initial: SessionStatus) -> Self {
        Self {
            session_id: session_id.into(),
            status: initial,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Apply a server `session_update`.
    ///
    /// Server values are authoritative except that nothing leaves `closed`.
    pub fn apply_update(&mut self, status: SessionStatus) -> Transition {
        if self.status.is_terminal() && status != SessionStatus::Closed {
            tracing::warn!(
                session_id = %self.session_id,
                requested = %status,
                "Ignoring session update out of closed state"
            );
            return Transition::Rejected { requested: status };
        }
        self.set(status)
    }

    /// A customer arriving activates a waiting session
    pub fn apply_user_joined(&mut self, user_type: ParticipantRole) -> Transition {
        if user_type == ParticipantRole::Customer && self.status == SessionStatus::Waiting {
            return self.set(SessionStatus::Active);
        }
        Transition::Unchanged
    }

    /// Local close confirmed by the REST collaborator
    pub fn close(&mut self) -> Transition {
        self.set(SessionStatus::Closed)
    }

    pub fn can_send(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn ensure_can_send(&self) -> ClientResult<()> {
        if self.can_send() {
            Ok(())
        } else {
            Err(ClientError::SessionClosed)
        }
    }

    fn set(&mut self, to: SessionStatus) -> Transition {
        let from = self.status;
        if from == to {
            return Transition::Unchanged;
        }
        self.status = to;
        tracing::info!(
            session_id = %self.session_id,
            from = %from,
            to = %to,
            "Session status changed"
        );
        Transition::Changed { from, to }
    }
}
