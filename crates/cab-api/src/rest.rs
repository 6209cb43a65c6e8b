//! REST handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use uuid::Uuid;

use cab_agent::{CreateOptions, ListFilter, Session, SessionKind, SessionStatus};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn parse_kind(value: &str) -> Option<SessionKind> {
    match value {
        "internal" => Some(SessionKind::Internal),
        "external" => Some(SessionKind::External),
        _ => None,
    }
}

pub(crate) fn parse_status(value: &str) -> Option<SessionStatus> {
    match value {
        "working" => Some(SessionStatus::Working),
        "idle" => Some(SessionStatus::Idle),
        "offline" => Some(SessionStatus::Offline),
        _ => None,
    }
}

/// Session ids arrive as path strings; anything that is not a UUID names
/// no session.
fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::not_found("Session not found"))
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub agent: Option<String>,
    pub status: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.supervisor.list(&ListFilter::default()).await.len();
    Json(json!({
        "status": "ok",
        "clients": state.ws_clients.load(Ordering::Relaxed),
        "sessions": sessions,
    }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Json<Vec<Session>> {
    let filter = ListFilter {
        kind: query.kind.as_deref().and_then(parse_kind),
        agent: query.agent,
        status: query.status.as_deref().and_then(parse_status),
    };
    Json(state.supervisor.list(&filter).await)
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let opts: CreateOptions = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid body: {}", e)))?;
    let session = state.supervisor.create(opts).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let id = parse_id(&id)?;
    state
        .supervisor
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    pub name: Option<String>,
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Session>, ApiError> {
    let id = parse_id(&id)?;
    let body: UpdateBody = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid body: {}", e)))?;
    match body.name {
        Some(name) if !name.trim().is_empty() => {
            let session = state
                .supervisor
                .update_name(&id, name.trim().to_string())
                .await?;
            Ok(Json(session))
        }
        Some(_) => Err(ApiError::bad_request("name must not be empty")),
        None => state
            .supervisor
            .get(&id)
            .await
            .map(Json)
            .ok_or_else(|| ApiError::not_found("Session not found")),
    }
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    state.supervisor.delete(&id).await?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub prompt: Option<String>,
}

pub async fn send_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    let body: PromptBody = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid body: {}", e)))?;
    let prompt = body
        .prompt
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing prompt"))?;
    state.supervisor.send_prompt(&id, &prompt).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;
    state.supervisor.cancel(&id).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn restart_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let id = parse_id(&id)?;
    let session = state.supervisor.restart(&id).await?;
    Ok(Json(session))
}

/// Event intake: the same pipeline as the events-file tailer.
pub async fn post_event(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    match state.decoder.decode_value(&payload) {
        Some(processed) => {
            state.supervisor.ingest(processed).await;
            Ok(Json(json!({"success": true})))
        }
        None => Err(ApiError::bad_request("Unrecognized hook payload")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
