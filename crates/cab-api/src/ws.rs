//! WebSocket surface: upgrade on the root path, `{type, data}` envelopes,
//! supervisor-signal broadcast, and the ping/history/subscribe verbs.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;

use cab_agent::{AgentEvent, ListFilter, Session, SessionSignal};

use crate::router::origin_allowed;
use crate::state::AppState;

/// Close code for an upgrade from an unlisted origin.
const CLOSE_FORBIDDEN_ORIGIN: u16 = 4003;

#[derive(Debug, Serialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: Value,
}

impl WsMessage {
    pub fn new(msg_type: &str, data: Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data,
        }
    }

    pub fn init(sessions: &[Session]) -> Self {
        Self::new("init", json!({ "sessions": sessions }))
    }

    pub fn pong() -> Self {
        Self::new("pong", Value::Null)
    }

    pub fn event(event: &AgentEvent) -> Self {
        Self::new("event", serde_json::to_value(event).unwrap_or(Value::Null))
    }

    pub fn session(kind: &str, session: &Session) -> Self {
        Self::new(kind, serde_json::to_value(session).unwrap_or(Value::Null))
    }

    pub fn history(events: &[AgentEvent]) -> Self {
        Self::new("history", json!({ "events": events }))
    }

    fn text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}

/// Per-client narrowing of `event` broadcasts. Session lifecycle messages
/// always go through.
#[derive(Debug, Default)]
struct Subscription {
    sessions: Option<HashSet<String>>,
    event_types: Option<HashSet<String>>,
}

impl Subscription {
    fn wants(&self, event: &AgentEvent) -> bool {
        if let Some(sessions) = &self.sessions {
            match &event.session_id {
                Some(id) if sessions.contains(id) => {}
                _ => return false,
            }
        }
        if let Some(types) = &self.event_types {
            let tag = serde_json::to_value(event)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string));
            match tag {
                Some(tag) if types.contains(&tag) => {}
                _ => return false,
            }
        }
        true
    }
}

fn str_set(value: &Value, key: &str) -> Option<HashSet<String>> {
    value.get(key)?.as_array().map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(origin) = &origin {
        if !origin_allowed(&state.config.allowed_origins, origin) {
            tracing::warn!(origin = %origin, "rejecting WebSocket from unlisted origin");
            return ws.on_upgrade(|socket| reject_socket(socket));
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The HTTP upgrade has already happened by the time the origin verdict can
/// reach the client, so the rejection is a close frame with code 4003.
async fn reject_socket(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_FORBIDDEN_ORIGIN,
            reason: "origin not allowed".into(),
        })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    state.ws_clients.fetch_add(1, Ordering::Relaxed);
    tracing::debug!("WebSocket client connected");

    let sessions = state.supervisor.list(&ListFilter::default()).await;
    if socket
        .send(Message::Text(WsMessage::init(&sessions).text().into()))
        .await
        .is_err()
    {
        state.ws_clients.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let mut signals = state.supervisor.subscribe();
    let mut subscription = Subscription::default();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_message(&mut socket, &state, &text, &mut subscription)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
            signal = signals.recv() => {
                match signal {
                    Ok(signal) => {
                        if let Some(message) = broadcast_message(&signal, &subscription) {
                            if socket
                                .send(Message::Text(message.text().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket client lagged by {} signals", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.ws_clients.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!("WebSocket client disconnected");
}

fn broadcast_message(signal: &SessionSignal, subscription: &Subscription) -> Option<WsMessage> {
    match signal {
        SessionSignal::Event(event) => {
            subscription.wants(event).then(|| WsMessage::event(event))
        }
        SessionSignal::Created(session) => Some(WsMessage::session("session:created", session)),
        SessionSignal::Updated(session) => Some(WsMessage::session("session:updated", session)),
        SessionSignal::Deleted(session) => Some(WsMessage::session("session:deleted", session)),
        SessionSignal::Status { session, .. } => {
            Some(WsMessage::session("session:status", session))
        }
    }
}

async fn handle_client_message(
    socket: &mut WebSocket,
    state: &AppState,
    text: &str,
    subscription: &mut Subscription,
) -> Result<(), ()> {
    let message: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Ok(()), // a bad client message never tears down the socket
    };

    match message.get("type").and_then(Value::as_str) {
        Some("ping") => {
            socket
                .send(Message::Text(WsMessage::pong().text().into()))
                .await
                .map_err(|_| ())?;
        }
        Some("get_history") => {
            let limit = message
                .get("limit")
                .and_then(Value::as_u64)
                .map(|l| l as usize);
            let session_id = message
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let events = state.history_snapshot(limit, session_id.as_deref()).await;
            socket
                .send(Message::Text(WsMessage::history(&events).text().into()))
                .await
                .map_err(|_| ())?;
        }
        Some("subscribe") => {
            subscription.sessions = str_set(&message, "sessions");
            subscription.event_types = str_set(&message, "eventTypes");
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
