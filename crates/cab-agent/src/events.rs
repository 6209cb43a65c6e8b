//! Canonical, agent-agnostic event taxonomy.
//!
//! Adapters translate their native hook vocabularies into these kinds;
//! everything downstream (supervisor, WebSocket broadcast) speaks only this
//! shape. Events are immutable value objects — they trigger session updates
//! but never carry mutable session state themselves.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Terminal coordinates extracted from a hook payload, when the hook ran
/// inside tmux or on a known tty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
}

impl TerminalInfo {
    pub fn is_empty(&self) -> bool {
        self.pane_id.is_none() && self.socket.is_none() && self.tty.is_none()
    }
}

/// One block of assistant-message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolInput")]
        tool_input: serde_json::Value,
        #[serde(rename = "toolUseId", default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    PreToolUse {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
    PostToolUse {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_response: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
    },
    Stop {
        stop_hook_active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
    SubagentStop,
    SessionStart {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terminal: Option<TerminalInfo>,
    },
    SessionEnd,
    UserPromptSubmit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    Notification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
    },
    AssistantMessage {
        content: Vec<ContentBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        is_preamble: bool,
    },
}

/// One canonical event. `session_id` (the bridge UUID) is injected by the
/// supervisor before broadcast; `agent_session_id` is the identity the
/// assistant itself reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl AgentEvent {
    pub fn new(agent: &str, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            kind,
            session_id: None,
            agent_session_id: None,
            agent: agent.to_string(),
            cwd: None,
        }
    }
}

/// A decoded hook payload plus the routing metadata the supervisor needs
/// to link it to a session.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event: AgentEvent,
    pub agent_session_id: String,
    pub agent: String,
    pub terminal: Option<TerminalInfo>,
    pub cwd: Option<String>,
    pub transcript_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
