//! Session view
//!
//! One open chat session. The view fetches the REST snapshot, owns a
//! [`ConnectionManager`] and runs a single task that drives all state transitions
//! through `tokio::select!` over socket events, local commands, REST completions
//! and the typing idle deadline. Shutting the view down clears a showing typing
//! indicator, then cancels the socket, the reconnect schedule and the typing timer.

use supportdesk_shared::{
    ConnectionStatus, Message, ParticipantRole, SendMessageRequest, Session, SessionStatus,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionTarget};
use crate::connection_status::fetch_with_timeout;
use crate::error::{ClientError, ClientResult};
use crate::rest::RestClient;
use crate::sync::{SessionSync, ViewEvent};

/// The local user attached to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub role: ParticipantRole,
}

/// Point-in-time copy of the view state
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub connected: bool,
    pub counterpart_typing: bool,
}

enum ViewCommand {
    Keystroke,
    Send {
        text: String,
        reply: oneshot::Sender<ClientResult<Message>>,
    },
    Close {
        reason: Option<String>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Snapshot(oneshot::Sender<ViewSnapshot>),
}

/// Results of REST calls spawned by the view task
enum Completion {
    Sent {
        text: String,
        result: ClientResult<Message>,
        reply: oneshot::Sender<ClientResult<Message>>,
    },
    Closed {
        result: ClientResult<Session>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    InitialStatus(ClientResult<ConnectionStatus>),
}

pub struct SessionView {
    session_id: String,
    commands: mpsc::UnboundedSender<ViewCommand>,
    connection_status: watch::Receiver<Option<ConnectionStatus>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionView {
    /// Load the session and its history, then attach to its socket
    pub async fn open(
        config: &ClientConfig,
        rest: RestClient,
        participant: Participant,
        session_id: &str,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<ViewEvent>)> {
        let session = rest.get_session(session_id).await?;
        let history = rest.get_messages(session_id).await?;

        tracing::info!(
            session_id = %session_id,
            status = %session.status,
            messages = history.len(),
            role = %participant.role,
            "Opening session view"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut sync = SessionSync::new(
            session_id,
            participant.role,
            session.status,
            config.typing_idle_timeout,
            events_tx,
        );
        sync.apply_snapshot(history);
        let connection_status = sync.subscribe_connection_status();

        let cancel = CancellationToken::new();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::spawn(
            ConnectionTarget {
                ws_base: config.ws_url.clone(),
                session_id: session_id.to_string(),
                participant_id: participant.id.clone(),
                role: participant.role,
            },
            config.reconnect_delay,
            // Cancelled by the worker after its last envelope is queued
            CancellationToken::new(),
            socket_tx,
        );

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        // Cold-start connection status; pushes take over once they arrive
        {
            let rest = rest.clone();
            let done = completions_tx.clone();
            let session_id = session_id.to_string();
            let timeout = config.status_fetch_timeout;
            tokio::spawn(async move {
                let result = fetch_with_timeout(rest.connection_status(&session_id), timeout).await;
                let _ = done.send(Completion::InitialStatus(result));
            });
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let worker = ViewWorker {
            sync,
            rest,
            participant,
            connection,
            cancel: cancel.clone(),
            completions: completions_tx,
        };
        let task = tokio::spawn(worker.run(socket_rx, commands_rx, completions_rx));

        Ok((
            Self {
                session_id: session_id.to_string(),
                commands,
                connection_status,
                cancel,
                task: Some(task),
            },
            events_rx,
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Report a local keystroke in the draft
    pub fn keystroke(&self) -> ClientResult<()> {
        self.commands
            .send(ViewCommand::Keystroke)
            .map_err(|_| ClientError::ViewClosed)
    }

    /// Send a message through the REST collaborator
    ///
    /// Rejected locally with [`ClientError::SessionClosed`] once the session is closed.
    pub async fn send_message(&self, text: impl Into<String>) -> ClientResult<Message> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ViewCommand::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| ClientError::ViewClosed)?;
        rx.await.map_err(|_| ClientError::ViewClosed)?
    }

    /// Close the session; the local state goes to `closed` as soon as the server confirms
    pub async fn close_session(&self, reason: Option<String>) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ViewCommand::Close { reason, reply })
            .map_err(|_| ClientError::ViewClosed)?;
        rx.await.map_err(|_| ClientError::ViewClosed)?
    }

    pub async fn snapshot(&self) -> ClientResult<ViewSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ViewCommand::Snapshot(reply))
            .map_err(|_| ClientError::ViewClosed)?;
        rx.await.map_err(|_| ClientError::ViewClosed)
    }

    pub fn connection_status(&self) -> watch::Receiver<Option<ConnectionStatus>> {
        self.connection_status.clone()
    }

    /// Tear the view down and wait for its task to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ViewWorker {
    sync: SessionSync,
    rest: RestClient,
    participant: Participant,
    connection: ConnectionManager,
    cancel: CancellationToken,
    completions: mpsc::UnboundedSender<Completion>,
}

impl ViewWorker {
    async fn run(
        mut self,
        mut socket: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut commands: mpsc::UnboundedReceiver<ViewCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let idle = tokio::time::sleep_until(Instant::now());
        tokio::pin!(idle);

        loop {
            let deadline = self.sync.typing_deadline();
            if let Some(deadline) = deadline {
                idle.as_mut().reset(deadline);
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(event) = socket.recv() => self.sync.handle_connection_event(event),

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(done) = completions.recv() => self.handle_completion(done),

                _ = &mut idle, if deadline.is_some() => {
                    if let Some(envelope) = self.sync.on_typing_deadline(Instant::now()) {
                        self.connection.send(envelope);
                    }
                }
            }

            for envelope in self.sync.take_outbound() {
                self.connection.send(envelope);
            }
        }

        if let Some(envelope) = self.sync.teardown() {
            self.connection.send(envelope);
        }
        self.connection.shutdown().await;
        tracing::info!(session_id = %self.sync.session_id(), "Session view closed");
    }

    fn handle_command(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Keystroke => {
                if let Some(envelope) = self.sync.on_keystroke(Instant::now()) {
                    self.connection.send(envelope);
                }
            }
            ViewCommand::Send { text, reply } => {
                if let Err(e) = self.sync.ensure_can_send() {
                    tracing::debug!(session_id = %self.sync.session_id(), "Rejecting send on closed session");
                    let _ = reply.send(Err(e));
                    return;
                }
                if let Some(envelope) = self.sync.on_draft_sent() {
                    self.connection.send(envelope);
                }

                let request = SendMessageRequest {
                    sender_type: self.participant.role.sender_type(),
                    sender_id: Some(self.participant.id.clone()),
                    message: text.clone(),
                    message_type: None,
                };
                let rest = self.rest.clone();
                let done = self.completions.clone();
                let session_id = self.sync.session_id().to_string();
                tokio::spawn(async move {
                    let result = rest.send_message(&session_id, &request).await;
                    let _ = done.send(Completion::Sent {
                        text,
                        result,
                        reply,
                    });
                });
            }
            ViewCommand::Close { reason, reply } => {
                if self.sync.status().is_terminal() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                let rest = self.rest.clone();
                let done = self.completions.clone();
                let session_id = self.sync.session_id().to_string();
                tokio::spawn(async move {
                    let result = rest.close_session(&session_id, reason).await;
                    let _ = done.send(Completion::Closed { result, reply });
                });
            }
            ViewCommand::Snapshot(reply) => {
                let _ = reply.send(ViewSnapshot {
                    session_id: self.sync.session_id().to_string(),
                    status: self.sync.status(),
                    messages: self.sync.messages().to_vec(),
                    connected: self.sync.is_connected(),
                    counterpart_typing: self.sync.is_remote_typing(),
                });
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Sent {
                text,
                result,
                reply,
            } => match result {
                Ok(message) => {
                    self.sync.accept_message(message.clone());
                    let _ = reply.send(Ok(message));
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.sync.session_id(), error = %e, "Message send failed");
                    self.sync.report_error(format!("Failed to send message: {}", e));
                    self.sync.restore_draft(text);
                    let _ = reply.send(Err(e));
                }
            },
            Completion::Closed { result, reply } => match result {
                Ok(_session) => {
                    self.sync.mark_closed();
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.sync.session_id(), error = %e, "Session close failed");
                    self.sync.report_error(format!("Failed to close session: {}", e));
                    let _ = reply.send(Err(e));
                }
            },
            Completion::InitialStatus(result) => match result {
                Ok(status) => self.sync.apply_pulled_status(status),
                Err(e) => {
                    tracing::warn!(session_id = %self.sync.session_id(), error = %e, "Connection status unavailable");
                    self.sync.report_error(format!("Connection status unavailable: {}", e));
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session_json(status: &str) -> String {
        format!(
            r#"{{"id":"s1","status":"{}","priority":"normal","customer_name":"Ada",
                "customer_email":"ada@example.com","started_at":"2024-05-01T10:00:00Z"}}"#,
            status
        )
    }

    async fn mock_session(server: &mut mockito::Server, status: &str) {
        server
            .mock("GET", "/api/v1/sessions/s1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(session_json(status))
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/sessions/s1/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/sessions/s1/connection-status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"customer_connections":1,"agent_connections":0,
                    "customer_connected":true,"agent_connected":false}"#,
            )
            .create_async()
            .await;
    }

    fn config(server: &mockito::Server) -> ClientConfig {
        let mut config = ClientConfig::new(server.url());
        // No socket server behind mockito; keep retries cheap
        config.reconnect_delay = Duration::from_millis(50);
        config
    }

    fn customer() -> Participant {
        Participant {
            id: "c1".into(),
            role: ParticipantRole::Customer,
        }
    }

    #[tokio::test]
    async fn test_closed_session_rejects_send_without_network() {
        let mut server = mockito::Server::new_async().await;
        mock_session(&mut server, "closed").await;
        let post = server
            .mock("POST", "/api/v1/sessions/s1/messages")
            .expect(0)
            .create_async()
            .await;

        let config = config(&server);
        let rest = RestClient::new(&config.api_url, config.request_timeout).unwrap();
        let (view, _events) = SessionView::open(&config, rest, customer(), "s1").await.unwrap();

        let err = view.send_message("anyone there?").await.unwrap_err();
        assert!(matches!(err, ClientError::SessionClosed));
        assert_eq!(view.snapshot().await.unwrap().status, SessionStatus::Closed);

        view.shutdown().await;
        post.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_send_restores_draft() {
        let mut server = mockito::Server::new_async().await;
        mock_session(&mut server, "active").await;
        server
            .mock("POST", "/api/v1/sessions/s1/messages")
            .with_status(500)
            .with_body(r#"{"error":{"code":"INTERNAL_ERROR","message":"boom"}}"#)
            .create_async()
            .await;

        let config = config(&server);
        let rest = RestClient::new(&config.api_url, config.request_timeout).unwrap();
        let (view, mut events) = SessionView::open(&config, rest, customer(), "s1").await.unwrap();

        assert!(view.send_message("hello").await.is_err());

        let restored = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(ViewEvent::DraftRestored(text)) => return text,
                    Some(_) => continue,
                    None => panic!("view event stream ended"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(restored, "hello");
        assert!(view.snapshot().await.unwrap().messages.is_empty());

        view.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_applies_immediately() {
        let mut server = mockito::Server::new_async().await;
        mock_session(&mut server, "active").await;
        let close = server
            .mock("POST", "/api/v1/sessions/s1/close")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"reason":"resolved"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(session_json("closed"))
            .create_async()
            .await;

        let config = config(&server);
        let rest = RestClient::new(&config.api_url, config.request_timeout).unwrap();
        let (view, _events) = SessionView::open(&config, rest, customer(), "s1").await.unwrap();

        view.close_session(Some("resolved".into())).await.unwrap();
        assert_eq!(view.snapshot().await.unwrap().status, SessionStatus::Closed);
        // A second close is a local no-op
        view.close_session(None).await.unwrap();

        close.assert_async().await;
        view.shutdown().await;
    }

    #[tokio::test]
    async fn test_cold_start_status_pull() {
        let mut server = mockito::Server::new_async().await;
        mock_session(&mut server, "waiting").await;

        let config = config(&server);
        let rest = RestClient::new(&config.api_url, config.request_timeout).unwrap();
        let (view, _events) = SessionView::open(&config, rest, customer(), "s1").await.unwrap();

        let mut status = view.connection_status();
        let pulled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(current) = *status.borrow_and_update() {
                    return current;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(pulled.customer_connected);

        view.shutdown().await;
    }

    /// Socket server that reports every typing indicator value it receives
    async fn typing_server() -> (String, mpsc::UnboundedReceiver<bool>) {
        use futures::StreamExt;
        use supportdesk_shared::{Envelope, Payload};
        use tokio_tungstenite::tungstenite::Message as Frame;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(Ok(Frame::Text(text))) = ws.next().await {
                        if let Ok(Envelope {
                            payload: Payload::TypingIndicator(data),
                            ..
                        }) = Envelope::decode(&text)
                        {
                            let _ = tx.send(data.is_typing);
                        }
                    }
                });
            }
        });
        (format!("ws://{}", addr), rx)
    }

    async fn wait_connected(events: &mut mpsc::UnboundedReceiver<ViewEvent>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(ViewEvent::ConnectionChanged { connected: true }) => return,
                    Some(_) => continue,
                    None => panic!("view event stream ended"),
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_keystroke_burst_sends_one_pair() {
        let mut server = mockito::Server::new_async().await;
        mock_session(&mut server, "active").await;
        let (ws_url, mut typing) = typing_server().await;

        let mut config = config(&server);
        config.ws_url = ws_url;
        let rest = RestClient::new(&config.api_url, config.request_timeout).unwrap();
        let (view, mut events) = SessionView::open(&config, rest, customer(), "s1").await.unwrap();
        wait_connected(&mut events).await;

        // Three keystrokes inside 500ms, then idle past the 1000ms timeout
        for _ in 0..3 {
            view.keystroke().unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(1200)).await;

        let mut sent = Vec::new();
        while let Ok(is_typing) = typing.try_recv() {
            sent.push(is_typing);
        }
        assert_eq!(sent, vec![true, false]);

        view.shutdown().await;
        assert!(typing.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_while_typing_clears_indicator() {
        let mut server = mockito::Server::new_async().await;
        mock_session(&mut server, "active").await;
        let (ws_url, mut typing) = typing_server().await;

        let mut config = config(&server);
        config.ws_url = ws_url;
        let rest = RestClient::new(&config.api_url, config.request_timeout).unwrap();
        let (view, mut events) = SessionView::open(&config, rest, customer(), "s1").await.unwrap();
        wait_connected(&mut events).await;

        view.keystroke().unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), typing.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(true));

        view.shutdown().await;
        let last = tokio::time::timeout(Duration::from_secs(5), typing.recv())
            .await
            .unwrap();
        assert_eq!(last, Some(false));
    }
}
