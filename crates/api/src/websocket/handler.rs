//! WebSocket handler for Axum
//!
//! Upgrades `/ws/chat/:session_id/:participant_id/:role` and routes session envelopes.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use std::sync::Arc;
use supportdesk_shared::{
    ConnectionStatusUpdate, Envelope, JoinedSession, NewMessage, ParticipantRole, Payload,
    SendMessageRequest, SessionStatus, SessionUpdate, UserJoined,
};
use tokio::sync::mpsc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use super::connection::Connection;

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// The session must exist; the socket joins the session room on its first `join_session`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Path((session_id, participant_id, role)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let role: ParticipantRole = role
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Unknown participant role: {}", role)))?;

    // Unknown sessions are rejected before the upgrade
    app_state.store.get_session(&session_id).await?;

    tracing::info!(
        session_id = %session_id,
        participant_id = %participant_id,
        role = %role,
        "WebSocket connection upgrade requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session_id, participant_id, role, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    session_id: String,
    participant_id: String,
    role: ParticipantRole,
    app_state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending envelopes to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let conn = Connection::new(session_id, participant_id, role, tx);
    let ws_state = app_state.ws_state.clone();
    let conn = ws_state.add_connection(conn).await;
    let connection_id = conn.connection_id;

    // Spawn task to send envelopes to client
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match envelope.encode() {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize envelope");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = ?e, "WebSocket read failed");
                break;
            }
        };

        match msg {
            Message::Text(text) => match Envelope::decode(&text) {
                Ok(envelope) => handle_envelope(envelope, &conn, &app_state).await,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Ignoring malformed envelope"
                    );
                }
            },
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    // Cleanup on disconnect
    tracing::info!(
        connection_id = %connection_id,
        session_id = %conn.session_id,
        "WebSocket connection closing"
    );
    for session_id in ws_state.remove_connection(&connection_id).await {
        broadcast_connection_status(&app_state, &session_id).await;
    }

    send_task.abort();
}

/// Route one decoded envelope
async fn handle_envelope(envelope: Envelope, conn: &Arc<Connection>, app_state: &AppState) {
    if envelope.session_id != conn.session_id {
        tracing::warn!(
            connection_id = %conn.connection_id,
            expected = %conn.session_id,
            received = %envelope.session_id,
            "Ignoring envelope for another session"
        );
        return;
    }

    match envelope.payload {
        Payload::JoinSession(join) => {
            if let Some((role, id)) = join.participant() {
                if role != conn.role || id != conn.participant_id {
                    tracing::warn!(
                        connection_id = %conn.connection_id,
                        role = %role,
                        participant_id = %id,
                        "join_session identity differs from socket path, using path"
                    );
                }
            }
            join_session(conn, app_state).await;
        }

        Payload::TypingIndicator(typing) => {
            let rooms = &app_state.ws_state.rooms;
            if !rooms.contains(&conn.session_id, &conn.connection_id).await {
                tracing::debug!(connection_id = %conn.connection_id, "Typing before join, ignoring");
                return;
            }
            rooms
                .broadcast_except(
                    &conn.session_id,
                    &conn.connection_id,
                    Envelope::new(conn.session_id.as_str(), Payload::TypingIndicator(typing)),
                )
                .await;
        }

        Payload::NewMessage(data) => {
            let request = SendMessageRequest {
                sender_type: data.sender_type,
                sender_id: data.sender_id,
                message: data.message,
                message_type: data.message_type,
            };
            match app_state.store.add_message(&conn.session_id, request).await {
                Ok(message) => {
                    app_state
                        .ws_state
                        .rooms
                        .broadcast(
                            &conn.session_id,
                            Envelope::new(
                                conn.session_id.as_str(),
                                Payload::NewMessage(NewMessage::from(&message)),
                            ),
                        )
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %conn.session_id,
                        error = %e,
                        "Rejected socket message"
                    );
                }
            }
        }

        other => {
            tracing::debug!(
                connection_id = %conn.connection_id,
                kind = other.kind(),
                "Ignoring client envelope"
            );
        }
    }
}

async fn join_session(conn: &Arc<Connection>, app_state: &AppState) {
    let session_id = conn.session_id.as_str();
    let rooms = &app_state.ws_state.rooms;

    if !rooms.join(session_id, Arc::clone(conn)).await {
        tracing::debug!(connection_id = %conn.connection_id, "Socket already joined");
        return;
    }

    let _ = conn.send(Envelope::new(
        session_id,
        Payload::JoinedSession(JoinedSession {
            participant_id: Some(conn.participant_id.clone()),
        }),
    ));

    rooms
        .broadcast(
            session_id,
            Envelope::new(
                session_id,
                Payload::UserJoined(UserJoined {
                    session_id: session_id.to_string(),
                    user_type: conn.role,
                }),
            ),
        )
        .await;

    match conn.role {
        ParticipantRole::Agent => {
            if let Err(e) = app_state
                .store
                .assign_agent_if_unset(session_id, &conn.participant_id)
                .await
            {
                tracing::error!(error = ?e, session_id = %session_id, "Failed to assign agent");
            }
        }
        ParticipantRole::Customer => match app_state.store.activate_if_waiting(session_id).await {
            Ok(true) => {
                rooms
                    .broadcast(
                        session_id,
                        Envelope::new(
                            session_id,
                            Payload::SessionUpdate(SessionUpdate {
                                session_id: session_id.to_string(),
                                status: SessionStatus::Active,
                            }),
                        ),
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = ?e, session_id = %session_id, "Failed to activate session");
            }
        },
    }

    broadcast_connection_status(app_state, session_id).await;
}

/// Broadcast the recomputed per-role socket counts to a session room
pub async fn broadcast_connection_status(app_state: &AppState, session_id: &str) {
    let rooms = &app_state.ws_state.rooms;
    let connection_status = rooms.connection_status(session_id).await;
    rooms
        .broadcast(
            session_id,
            Envelope::new(
                session_id,
                Payload::ConnectionStatusUpdate(ConnectionStatusUpdate {
                    session_id: session_id.to_string(),
                    connection_status,
                }),
            ),
        )
        .await;
}
