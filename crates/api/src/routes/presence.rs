//! Agent presence routes

use axum::{extract::State, http::StatusCode, Json};
use supportdesk_shared::{AgentPresence, HeartbeatRequest, OfflineRequest};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

fn validate_agent_id(agent_id: &str) -> ApiResult<()> {
    if agent_id.trim().is_empty() {
        return Err(ApiError::Validation("agent_id is required".into()));
    }
    Ok(())
}

/// Record a heartbeat carrying the agent's current status
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<AgentPresence>> {
    validate_agent_id(&req.agent_id)?;

    let presence = state.store.record_heartbeat(&req.agent_id, req.status).await;
    tracing::debug!(agent_id = %req.agent_id, status = %req.status, "Agent heartbeat");
    Ok(Json(presence))
}

pub async fn set_offline(
    State(state): State<AppState>,
    Json(req): Json<OfflineRequest>,
) -> ApiResult<StatusCode> {
    validate_agent_id(&req.agent_id)?;

    if state.store.set_offline(&req.agent_id).await {
        tracing::info!(agent_id = %req.agent_id, "Agent went offline");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Agents with a heartbeat inside the presence TTL
pub async fn list_presence(State(state): State<AppState>) -> Json<Vec<AgentPresence>> {
    Json(state.store.list_presence(state.config.presence_ttl).await)
}
