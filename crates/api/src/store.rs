//! In-memory session, message and presence store
//!
//! Single-process storage behind `tokio::sync::RwLock`. Sessions and messages
//! are kept for the lifetime of the process.

use std::collections::HashMap;
use std::time::Duration;

use supportdesk_shared::{
    AgentPresence, CreateSessionRequest, Message, PresenceStatus, SendMessageRequest, SenderType,
    Session, SessionStatus, DEFAULT_MESSAGE_TYPE,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session is closed: {0}")]
    SessionClosed(String),

    #[error("Message content cannot be empty")]
    EmptyMessage,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of closing a session
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub session: Session,
    /// False if the session was already closed
    pub changed: bool,
    /// System message recording the close reason, if one was given
    pub system_message: Option<Message>,
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
    presence: HashMap<String, AgentPresence>,
}

#[derive(Default)]
pub struct SupportStore {
    inner: RwLock<StoreInner>,
}

impl SupportStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn create_session(&self, req: CreateSessionRequest) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Waiting,
            priority: req.priority,
            agent_id: None,
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            subject: req.subject,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
        };

        let mut inner = self.inner.write().await;
        inner.messages.insert(session.id.clone(), Vec::new());
        inner.sessions.insert(session.id.clone(), session.clone());

        tracing::info!(session_id = %session.id, "Session created");
        session
    }

    pub async fn get_session(&self, session_id: &str) -> StoreResult<Session> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    /// Move a waiting session to active. Returns true if the status changed.
    pub async fn activate_if_waiting(&self, session_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        if session.status != SessionStatus::Waiting {
            return Ok(false);
        }
        session.status = SessionStatus::Active;
        tracing::info!(session_id = %session_id, "Session activated");
        Ok(true)
    }

    /// Record the first agent to attach to a session
    pub async fn assign_agent_if_unset(&self, session_id: &str, agent_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        if session.agent_id.is_none() {
            session.agent_id = Some(agent_id.to_string());
            tracing::info!(session_id = %session_id, agent_id = %agent_id, "Agent assigned");
        }
        Ok(())
    }

    pub async fn close_session(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> StoreResult<CloseOutcome> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        if session.status.is_terminal() {
            return Ok(CloseOutcome {
                session: session.clone(),
                changed: false,
                system_message: None,
            });
        }

        let now = OffsetDateTime::now_utc();
        session.status = SessionStatus::Closed;
        session.ended_at = Some(now);
        let session = session.clone();

        let system_message = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .map(|reason| Message {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                sender_type: SenderType::System,
                sender_id: None,
                message: format!("Session closed: {}", reason),
                message_type: "system".to_string(),
                created_at: now,
            });
        if let Some(message) = &system_message {
            inner
                .messages
                .entry(session_id.to_string())
                .or_default()
                .push(message.clone());
        }

        tracing::info!(session_id = %session_id, "Session closed");
        Ok(CloseOutcome {
            session,
            changed: true,
            system_message,
        })
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Messages in creation order
    pub async fn list_messages(&self, session_id: &str) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        if !inner.sessions.contains_key(session_id) {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(inner.messages.get(session_id).cloned().unwrap_or_default())
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        req: SendMessageRequest,
    ) -> StoreResult<Message> {
        if req.message.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }

        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        if session.status.is_terminal() {
            return Err(StoreError::SessionClosed(session_id.to_string()));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender_type: req.sender_type,
            sender_id: req.sender_id,
            message: req.message,
            message_type: req
                .message_type
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            created_at: OffsetDateTime::now_utc(),
        };
        inner
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    // =========================================================================
    // Presence
    // =========================================================================

    pub async fn record_heartbeat(&self, agent_id: &str, status: PresenceStatus) -> AgentPresence {
        let presence = AgentPresence {
            agent_id: agent_id.to_string(),
            status,
            last_heartbeat: OffsetDateTime::now_utc(),
        };
        let mut inner = self.inner.write().await;
        inner.presence.insert(agent_id.to_string(), presence.clone());
        presence
    }

    /// Returns true if the agent had a presence entry
    pub async fn set_offline(&self, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.presence.remove(agent_id).is_some()
    }

    /// Agents whose last heartbeat is within `ttl`, ordered by id
    pub async fn list_presence(&self, ttl: Duration) -> Vec<AgentPresence> {
        let cutoff = OffsetDateTime::now_utc() - ttl;
        let inner = self.inner.read().await;
        let mut present: Vec<AgentPresence> = inner
            .presence
            .values()
            .filter(|p| p.last_heartbeat >= cutoff)
            .cloned()
            .collect();
        present.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        present
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use supportdesk_shared::SessionPriority;

    fn create_request() -> CreateSessionRequest {
        CreateSessionRequest {
            customer_name: "Ada".into(),
            customer_email: "ada@example.com".into(),
            subject: Some("Billing".into()),
            priority: SessionPriority::High,
        }
    }

    fn text(sender_type: SenderType, body: &str) -> SendMessageRequest {
        SendMessageRequest {
            sender_type,
            sender_id: None,
            message: body.into(),
            message_type: None,
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SupportStore::new();
        let session = store.create_session(create_request()).await;
        assert_eq!(session.status, SessionStatus::Waiting);

        assert!(store.activate_if_waiting(&session.id).await.unwrap());
        assert!(!store.activate_if_waiting(&session.id).await.unwrap());

        let outcome = store
            .close_session(&session.id, Some("resolved".into()))
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.session.status, SessionStatus::Closed);
        assert!(outcome.session.ended_at.is_some());
        assert_eq!(
            outcome.system_message.unwrap().message,
            "Session closed: resolved"
        );

        let again = store.close_session(&session.id, None).await.unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_messages() {
        let store = SupportStore::new();
        let session = store.create_session(create_request()).await;
        store
            .add_message(&session.id, text(SenderType::Customer, "hi"))
            .await
            .unwrap();
        store.close_session(&session.id, None).await.unwrap();

        let result = store
            .add_message(&session.id, text(SenderType::Agent, "still there?"))
            .await;
        assert!(matches!(result, Err(StoreError::SessionClosed(_))));
        assert_eq!(store.list_messages(&session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_message_defaults_and_validation() {
        let store = SupportStore::new();
        let session = store.create_session(create_request()).await;

        let message = store
            .add_message(&session.id, text(SenderType::Customer, "hello"))
            .await
            .unwrap();
        assert_eq!(message.message_type, "text");

        assert!(matches!(
            store
                .add_message(&session.id, text(SenderType::Customer, "   "))
                .await,
            Err(StoreError::EmptyMessage)
        ));
        assert!(matches!(
            store.list_messages("missing").await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_ttl_and_offline() {
        let store = SupportStore::new();
        store.record_heartbeat("b-agent", PresenceStatus::Busy).await;
        store.record_heartbeat("a-agent", PresenceStatus::Online).await;

        let present = store.list_presence(Duration::from_secs(360)).await;
        let ids: Vec<_> = present.iter().map(|p| p.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a-agent", "b-agent"]);

        assert!(store.set_offline("a-agent").await);
        assert!(!store.set_offline("a-agent").await);
        assert_eq!(store.list_presence(Duration::from_secs(360)).await.len(), 1);
    }
}
