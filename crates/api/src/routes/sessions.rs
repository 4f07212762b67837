//! Support session routes
//!
//! REST side of a live session. Writes that change what participants see are
//! also broadcast to the session room.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use supportdesk_shared::{
    CloseSessionRequest, ConnectionStatus, CreateSessionRequest, Envelope, Message, NewMessage,
    Payload, SendMessageRequest, Session, SessionUpdate,
};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Sessions
// =============================================================================

/// Open a new session in `waiting`
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    if req.customer_name.trim().is_empty() {
        return Err(ApiError::Validation("customer_name is required".into()));
    }
    if !req.customer_email.contains('@') {
        return Err(ApiError::Validation("customer_email is invalid".into()));
    }

    let session = state.store.create_session(req).await;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.store.get_session(&session_id).await?))
}

/// Close a session. Closing twice returns the closed session unchanged.
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<CloseSessionRequest>,
) -> ApiResult<Json<Session>> {
    let outcome = state.store.close_session(&session_id, req.reason).await?;

    if outcome.changed {
        let rooms = &state.ws_state.rooms;
        if let Some(message) = &outcome.system_message {
            rooms
                .broadcast(&session_id, new_message_envelope(message))
                .await;
        }
        rooms
            .broadcast(
                &session_id,
                Envelope::new(
                    session_id.as_str(),
                    Payload::SessionUpdate(SessionUpdate {
                        session_id: session_id.clone(),
                        status: outcome.session.status,
                    }),
                ),
            )
            .await;
    }

    Ok(Json(outcome.session))
}

/// Per-role socket counts for the session
pub async fn connection_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ConnectionStatus>> {
    state.store.get_session(&session_id).await?;
    Ok(Json(state.ws_state.rooms.connection_status(&session_id).await))
}

// =============================================================================
// Messages
// =============================================================================

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.store.list_messages(&session_id).await?))
}

/// Persist a message and push it to every socket in the session
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    if req.message.chars().count() > state.config.max_message_length {
        return Err(ApiError::Validation(format!(
            "Message exceeds {} characters",
            state.config.max_message_length
        )));
    }

    let message = state.store.add_message(&session_id, req).await?;

    state
        .ws_state
        .rooms
        .broadcast(&session_id, new_message_envelope(&message))
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

fn new_message_envelope(message: &Message) -> Envelope {
    Envelope::new(
        message.session_id.as_str(),
        Payload::NewMessage(NewMessage::from(message)),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request},
    };
    use supportdesk_shared::{ParticipantRole, SessionStatus};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::{config::Config, routes::create_router, websocket::connection::Connection};

    use super::*;

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(state: &AppState) -> Session {
        let response = create_router(state.clone())
            .oneshot(json_request(
                "POST",
                "/api/v1/sessions",
                serde_json::json!({"customer_name": "Ada", "customer_email": "ada@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        serde_json::from_value(body_json(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let state = AppState::new(Config::default());
        let session = create(&state).await;
        assert_eq!(session.status, SessionStatus::Waiting);

        let response = create_router(state)
            .oneshot(
                Request::get(format!("/api/v1/sessions/{}", session.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], session.id);
    }

    #[tokio::test]
    async fn test_create_session_validation() {
        let state = AppState::new(Config::default());
        let response = create_router(state)
            .oneshot(json_request(
                "POST",
                "/api/v1/sessions",
                serde_json::json!({"customer_name": " ", "customer_email": "ada@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_send_message_broadcasts_to_room() {
        let state = AppState::new(Config::default());
        let session = create(&state).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(
            session.id.as_str(),
            "a1",
            ParticipantRole::Agent,
            tx,
        ));
        state.ws_state.rooms.join(&session.id, conn).await;

        let response = create_router(state.clone())
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/messages", session.id),
                serde_json::json!({"sender_type": "customer", "message": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let stored: Message = serde_json::from_value(body_json(response).await).unwrap();

        let pushed = rx.try_recv().unwrap();
        match pushed.payload {
            Payload::NewMessage(data) => assert_eq!(data.message_id, stored.id),
            other => panic!("Expected NewMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_length_limit() {
        let state = AppState::new(Config {
            max_message_length: 5,
            ..Config::default()
        });
        let session = create(&state).await;

        let response = create_router(state)
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/messages", session.id),
                serde_json::json!({"sender_type": "agent", "message": "too long"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_close_rejects_later_messages() {
        let state = AppState::new(Config::default());
        let session = create(&state).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(
            session.id.as_str(),
            "c1",
            ParticipantRole::Customer,
            tx,
        ));
        state.ws_state.rooms.join(&session.id, conn).await;

        let response = create_router(state.clone())
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/close", session.id),
                serde_json::json!({"reason": "resolved"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "closed");

        // System message first, then the status change
        assert_eq!(rx.try_recv().unwrap().kind(), "new_message");
        match rx.try_recv().unwrap().payload {
            Payload::SessionUpdate(update) => assert_eq!(update.status, SessionStatus::Closed),
            other => panic!("Expected SessionUpdate, got {:?}", other),
        }

        let response = create_router(state)
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/sessions/{}/messages", session.id),
                serde_json::json!({"sender_type": "customer", "message": "wait"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_connection_status_for_unknown_session() {
        let state = AppState::new(Config::default());
        let response = create_router(state)
            .oneshot(
                Request::get("/api/v1/sessions/missing/connection-status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
