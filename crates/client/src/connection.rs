//! Connection manager for one session socket
//!
//! Owns a single logical WebSocket connection to
//! `{ws_base}/ws/chat/{session_id}/{participant_id}/{role}`. On open it sends
//! `join_session` and reports [`ConnectionEvent::Connected`]. Inbound frames are
//! decoded and forwarded in arrival order over one channel; frames that fail to
//! decode are logged and dropped. Losing the socket is never fatal: the manager
//! reports [`ConnectionEvent::Disconnected`] and reconnects after a fixed delay,
//! indefinitely, until cancelled.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use supportdesk_shared::{Envelope, JoinSession, ParticipantRole, Payload};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_retry::strategy::FixedInterval;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport address of one participant's session socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub ws_base: String,
    pub session_id: String,
    pub participant_id: String,
    pub role: ParticipantRole,
}

impl ConnectionTarget {
    pub fn url(&self) -> String {
        format!(
            "{}/ws/chat/{}/{}/{}",
            self.ws_base.trim_end_matches('/'),
            self.session_id,
            self.participant_id,
            self.role.as_str()
        )
    }

    fn join_envelope(&self) -> Envelope {
        Envelope::new(
            self.session_id.clone(),
            Payload::JoinSession(JoinSession::for_participant(
                self.role,
                self.participant_id.clone(),
            )),
        )
    }
}

/// Events reported by the connection task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Envelope(Envelope),
}

/// How a connected socket ended
enum SocketEnd {
    Lost,
    Cancelled,
}

/// Handle to the connection task
pub struct ConnectionManager {
    outbound: mpsc::UnboundedSender<Envelope>,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn the connection task. Cancelling `cancel` tears it down.
    pub fn spawn(
        target: ConnectionTarget,
        reconnect_delay: Duration,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicU32::new(0));

        let worker = ConnectionWorker {
            target,
            reconnect_delay,
            cancel: cancel.clone(),
            events,
            outbound: outbound_rx,
            connected: connected.clone(),
            attempts: attempts.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            outbound,
            connected,
            attempts,
            cancel,
            task: Some(task),
        }
    }

    /// Queue an envelope for the open socket
    ///
    /// Returns false and drops the envelope if no socket is open.
    pub fn send(&self, envelope: Envelope) -> bool {
        if !self.is_connected() {
            tracing::debug!(kind = envelope.kind(), "Not connected, dropping outbound envelope");
            return false;
        }
        self.outbound.send(envelope).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of reconnects scheduled so far
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Close the socket and wait for the task to finish; no reconnect follows
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ConnectionWorker {
    target: ConnectionTarget,
    reconnect_delay: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    outbound: mpsc::UnboundedReceiver<Envelope>,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let url = self.target.url();
        // One pending delay at a time, forever
        let mut schedule = FixedInterval::new(self.reconnect_delay);

        loop {
            if let SocketEnd::Cancelled = self.connect_and_serve(&url).await {
                break;
            }

            if self.connected.swap(false, Ordering::SeqCst) {
                let _ = self.events.send(ConnectionEvent::Disconnected);
            }

            let Some(delay) = schedule.next() else {
                break;
            };
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(
                session_id = %self.target.session_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!(session_id = %self.target.session_id, "Connection task stopped");
    }

    async fn connect_and_serve(&mut self, url: &str) -> SocketEnd {
        let connect = tokio::select! {
            _ = self.cancel.cancelled() => return SocketEnd::Cancelled,
            result = connect_async(url) => result,
        };

        let socket = match connect {
            Ok((socket, _response)) => socket,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.target.session_id,
                    error = %e,
                    "WebSocket connect failed"
                );
                return SocketEnd::Lost;
            }
        };

        self.serve(socket).await
    }

    async fn serve(&mut self, socket: Socket) -> SocketEnd {
        let (mut sink, mut stream) = socket.split();

        match self.target.join_envelope().encode() {
            Ok(join) => {
                if let Err(e) = sink.send(Message::Text(join)).await {
                    tracing::warn!(session_id = %self.target.session_id, error = %e, "Failed to send join");
                    return SocketEnd::Lost;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode join envelope");
                return SocketEnd::Lost;
            }
        }

        // Anything queued while the previous socket was down is stale
        while let Ok(stale) = self.outbound.try_recv() {
            tracing::debug!(kind = stale.kind(), "Dropping envelope queued while disconnected");
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            session_id = %self.target.session_id,
            participant_id = %self.target.participant_id,
            role = %self.target.role,
            "Session socket connected"
        );
        if self.events.send(ConnectionEvent::Connected).is_err() {
            return SocketEnd::Cancelled;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Envelopes queued before teardown still go out ahead of the close
                    while let Ok(envelope) = self.outbound.try_recv() {
                        let Ok(text) = envelope.encode() else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return SocketEnd::Cancelled;
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match Envelope::decode(&text) {
                        Ok(envelope) => {
                            if self.events.send(ConnectionEvent::Envelope(envelope)).is_err() {
                                return SocketEnd::Cancelled;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                session_id = %self.target.session_id,
                                error = %e,
                                "Dropping malformed envelope"
                            );
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(session_id = %self.target.session_id, frame = ?frame, "Server closed socket");
                        return SocketEnd::Lost;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(session_id = %self.target.session_id, "Dropping binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %self.target.session_id, error = %e, "Socket error");
                        return SocketEnd::Lost;
                    }
                    None => return SocketEnd::Lost,
                },

                outbound = self.outbound.recv() => {
                    let Some(envelope) = outbound else {
                        return SocketEnd::Cancelled;
                    };
                    match envelope.encode() {
                        Ok(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                tracing::warn!(session_id = %self.target.session_id, error = %e, "Send failed");
                                return SocketEnd::Lost;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to encode outbound envelope"),
                    }
                }
            }
        }
    }
}
