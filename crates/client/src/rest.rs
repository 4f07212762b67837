//! REST collaborator client
//!
//! Thin reqwest wrapper over the session/message persistence endpoints and the
//! agent presence endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize};
use supportdesk_shared::{
    AgentPresence, CloseSessionRequest, ConnectionStatus, CreateSessionRequest, HeartbeatRequest,
    Message, OfflineRequest, PresenceStatus, SendMessageRequest, Session,
};

use crate::error::{ClientError, ClientResult};

/// Prefix of all versioned REST routes
const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Client for the SupportDesk REST API
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ClientResult<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    pub async fn create_session(&self, request: &CreateSessionRequest) -> ClientResult<Session> {
        let response = self.http.post(self.url("/sessions")).json(request).send().await?;
        decode(response).await
    }

    pub async fn get_session(&self, session_id: &str) -> ClientResult<Session> {
        let response = self
            .http
            .get(self.url(&format!("/sessions/{}", session_id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Message history in creation order
    pub async fn get_messages(&self, session_id: &str) -> ClientResult<Vec<Message>> {
        let response = self
            .http
            .get(self.url(&format!("/sessions/{}/messages", session_id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Persist a message; the server assigns its id and timestamp
    pub async fn send_message(
        &self,
        session_id: &str,
        request: &SendMessageRequest,
    ) -> ClientResult<Message> {
        let response = self
            .http
            .post(self.url(&format!("/sessions/{}/messages", session_id)))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn close_session(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> ClientResult<Session> {
        let response = self
            .http
            .post(self.url(&format!("/sessions/{}/close", session_id)))
            .json(&CloseSessionRequest { reason })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn connection_status(&self, session_id: &str) -> ClientResult<ConnectionStatus> {
        let response = self
            .http
            .get(self.url(&format!("/sessions/{}/connection-status", session_id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Agents whose heartbeat is still current
    pub async fn list_presence(&self) -> ClientResult<Vec<AgentPresence>> {
        let response = self.http.get(self.url("/agents/presence")).send().await?;
        decode(response).await
    }
}

/// Server-facing half of the presence heartbeat
#[async_trait]
pub trait PresenceApi: Send + Sync {
    async fn heartbeat(&self, agent_id: &str, status: PresenceStatus) -> ClientResult<()>;

    async fn set_offline(&self, agent_id: &str) -> ClientResult<()>;
}

#[async_trait]
impl PresenceApi for RestClient {
    async fn heartbeat(&self, agent_id: &str, status: PresenceStatus) -> ClientResult<()> {
        let response = self
            .http
            .post(self.url("/agents/heartbeat"))
            .json(&HeartbeatRequest {
                agent_id: agent_id.to_string(),
                status,
            })
            .send()
            .await?;
        let _: AgentPresence = decode(response).await?;
        Ok(())
    }

    async fn set_offline(&self, agent_id: &str) -> ClientResult<()> {
        let response = self
            .http
            .post(self.url("/agents/offline"))
            .json(&OfflineRequest {
                agent_id: agent_id.to_string(),
            })
            .send()
            .await?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> ClientResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(api_error(status.as_u16(), response.text().await.unwrap_or_default()))
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(api_error(
            status.as_u16(),
            response.text().await.unwrap_or_default(),
        ));
    }
    Ok(response.json::<T>().await?)
}

/// Map an error response body (`{"error":{"code","message"}}`) to a client error
fn api_error(status: u16, body: String) -> ClientError {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => ClientError::Api {
            status,
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => ClientError::Api {
            status,
            code: "UNKNOWN".to_string(),
            message: body,
        },
    }
}
