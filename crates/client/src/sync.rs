//! Event-driven synchronization core for one session
//!
//! [`SessionSync`] owns the message log, typing coordinator, session state machine
//! and connection status aggregator. Decoded envelopes and local actions go in;
//! [`ViewEvent`]s for the rendering layer come out over an unbounded channel, and
//! outbound typing envelopes are returned to the caller for the socket. Indicators
//! raised as a side effect of an inbound envelope are queued for [`SessionSync::take_outbound`].

use std::time::Duration;

use supportdesk_shared::{
    ConnectionStatus, Envelope, Message, ParticipantRole, Payload, SessionStatus, TypingIndicator,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::connection::ConnectionEvent;
use crate::connection_status::ConnectionStatusAggregator;
use crate::error::ClientResult;
use crate::message_log::{MergeOutcome, MessageLog};
use crate::session_state::{SessionStateMachine, Transition};
use crate::typing::TypingCoordinator;

/// State changes published to the rendering layer
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    MessageAppended(Message),
    ScrollToNewest,
    SessionStatusChanged(SessionStatus),
    /// The counterpart started or stopped typing
    TypingChanged {
        role: ParticipantRole,
        is_typing: bool,
    },
    ConnectionChanged {
        connected: bool,
    },
    ConnectionStatus(ConnectionStatus),
    Error(String),
    /// A send failed; the text goes back into the draft
    DraftRestored(String),
}

pub struct SessionSync {
    session_id: String,
    local_role: ParticipantRole,
    log: MessageLog,
    typing: TypingCoordinator,
    state: SessionStateMachine,
    connection_status: ConnectionStatusAggregator,
    connected: bool,
    outbound: Vec<Envelope>,
    events: mpsc::UnboundedSender<ViewEvent>,
}

impl SessionSync {
    pub fn new(
        session_id: impl Into<String>,
        local_role: ParticipantRole,
        initial_status: SessionStatus,
        typing_idle_timeout: Duration,
        events: mpsc::UnboundedSender<ViewEvent>,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            log: MessageLog::new(),
            typing: TypingCoordinator::new(local_role, typing_idle_timeout),
            state: SessionStateMachine::new(session_id.clone(), initial_status),
            connection_status: ConnectionStatusAggregator::new(session_id.clone()),
            connected: false,
            outbound: Vec::new(),
            session_id,
            local_role,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_remote_typing(&self) -> bool {
        self.typing.is_remote_typing(self.local_role.counterpart())
    }

    pub fn subscribe_connection_status(&self) -> watch::Receiver<Option<ConnectionStatus>> {
        self.connection_status.subscribe()
    }

    /// Merge the REST history fetched on open
    pub fn apply_snapshot(&mut self, history: Vec<Message>) {
        let mut appended = false;
        for message in history {
            if let MergeOutcome::Appended = self.log.merge(message.clone()) {
                self.emit(ViewEvent::MessageAppended(message));
                appended = true;
            }
        }
        if appended {
            self.emit(ViewEvent::ScrollToNewest);
        }
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.set_connected(true),
            ConnectionEvent::Disconnected => self.set_connected(false),
            ConnectionEvent::Envelope(envelope) => self.handle_envelope(envelope),
        }
    }

    pub fn handle_envelope(&mut self, envelope: Envelope) {
        if envelope.session_id != self.session_id {
            tracing::debug!(
                session_id = %self.session_id,
                other_session = %envelope.session_id,
                kind = envelope.kind(),
                "Ignoring envelope for another session"
            );
            return;
        }

        match envelope.payload {
            Payload::NewMessage(data) => {
                self.accept_message(data.into_message());
            }
            Payload::TypingIndicator(data) => {
                if self.typing.apply_remote(data.sender_type, data.is_typing) {
                    self.emit(ViewEvent::TypingChanged {
                        role: data.sender_type,
                        is_typing: data.is_typing,
                    });
                }
            }
            Payload::SessionUpdate(data) => {
                let transition = self.state.apply_update(data.status);
                self.on_transition(transition);
            }
            Payload::UserJoined(data) => {
                tracing::debug!(session_id = %self.session_id, user_type = %data.user_type, "User joined");
                let transition = self.state.apply_user_joined(data.user_type);
                self.on_transition(transition);
            }
            Payload::ConnectionStatusUpdate(data) => {
                if self.connection_status.apply_push(&data) {
                    self.emit(ViewEvent::ConnectionStatus(data.connection_status));
                }
                if data.session_id == self.session_id {
                    self.clear_departed_typing(&data.connection_status);
                }
            }
            Payload::JoinedSession(_) => {
                tracing::debug!(session_id = %self.session_id, "Join acknowledged");
            }
            Payload::JoinSession(_) => {
                tracing::debug!(session_id = %self.session_id, "Ignoring join_session from server");
            }
            Payload::Unknown { kind, .. } => {
                tracing::debug!(session_id = %self.session_id, kind = %kind, "Ignoring unknown envelope type");
            }
        }
    }

    /// Merge a message from any source; appends notify the view
    pub fn accept_message(&mut self, message: Message) -> MergeOutcome {
        let outcome = self.log.merge(message.clone());
        if outcome.is_appended() {
            self.emit(ViewEvent::MessageAppended(message));
            self.emit(ViewEvent::ScrollToNewest);
        }
        outcome
    }

    /// Local keystroke; returns the indicator to send, if any
    pub fn on_keystroke(&mut self, now: Instant) -> Option<Envelope> {
        if !self.state.can_send() {
            return None;
        }
        let is_typing = self.typing.on_keystroke(now)?;
        Some(self.typing_envelope(is_typing))
    }

    pub fn on_typing_deadline(&mut self, now: Instant) -> Option<Envelope> {
        let is_typing = self.typing.on_deadline(now)?;
        Some(self.typing_envelope(is_typing))
    }

    /// The draft was submitted; clear our indicator if it is showing
    pub fn on_draft_sent(&mut self) -> Option<Envelope> {
        let is_typing = self.typing.finish()?;
        Some(self.typing_envelope(is_typing))
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    pub fn ensure_can_send(&self) -> ClientResult<()> {
        self.state.ensure_can_send()
    }

    /// Apply a confirmed local close without waiting for the echo
    pub fn mark_closed(&mut self) {
        let transition = self.state.close();
        self.on_transition(transition);
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.emit(ViewEvent::ConnectionChanged { connected });
        }
    }

    pub fn apply_pulled_status(&mut self, status: ConnectionStatus) {
        if self.connection_status.apply_pulled(status) {
            self.emit(ViewEvent::ConnectionStatus(status));
            self.clear_departed_typing(&status);
        }
    }

    /// Envelopes queued while handling inbound events
    pub fn take_outbound(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbound)
    }

    pub fn report_error(&self, message: impl Into<String>) {
        self.emit(ViewEvent::Error(message.into()));
    }

    pub fn restore_draft(&self, text: String) {
        self.emit(ViewEvent::DraftRestored(text));
    }

    /// Disarm the typing timer; returns the final `false` if we were typing
    pub fn teardown(&mut self) -> Option<Envelope> {
        let is_typing = self.typing.finish()?;
        Some(self.typing_envelope(is_typing))
    }

    fn on_transition(&mut self, transition: Transition) {
        if let Transition::Changed { to, .. } = transition {
            if to.is_terminal() {
                if let Some(is_typing) = self.typing.finish() {
                    let envelope = self.typing_envelope(is_typing);
                    self.outbound.push(envelope);
                }
                self.clear_remote_typing(self.local_role.counterpart());
            }
            self.emit(ViewEvent::SessionStatusChanged(to));
        }
    }

    /// A counterpart with no sockets left cannot send its `false`
    fn clear_departed_typing(&mut self, status: &ConnectionStatus) {
        let counterpart = self.local_role.counterpart();
        let present = match counterpart {
            ParticipantRole::Customer => status.customer_connected,
            ParticipantRole::Agent => status.agent_connected,
        };
        if !present {
            self.clear_remote_typing(counterpart);
        }
    }

    fn clear_remote_typing(&mut self, role: ParticipantRole) {
        if self.typing.apply_remote(role, false) {
            self.emit(ViewEvent::TypingChanged {
                role,
                is_typing: false,
            });
        }
    }

    fn typing_envelope(&self, is_typing: bool) -> Envelope {
        Envelope::new(
            self.session_id.clone(),
            Payload::TypingIndicator(TypingIndicator {
                session_id: self.session_id.clone(),
                sender_type: self.local_role,
                is_typing,
            }),
        )
    }

    fn emit(&self, event: ViewEvent) {
        // The renderer may already be gone
        let _ = self.events.send(event);
    }
}
