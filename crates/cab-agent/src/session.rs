//! The unit of supervision.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::events::TerminalInfo;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Spawned by the bridge inside a bridge-owned tmux session.
    Internal,
    /// Discovered from hook traffic the bridge did not originate.
    External,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Working,
    Idle,
    Offline,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Working => write!(f, "working"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub kind: SessionKind,
    pub agent: String,
    pub status: SessionStatus,
    pub cwd: String,
    pub created_at: i64,
    pub last_activity: i64,
    /// Bridge-owned tmux session name; set iff `kind` is internal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    /// The identifier the assistant reports in its hook payloads. Linked at
    /// most once for the session's life; only `restart` clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    /// Tool currently executing; only meaningful while `status` is working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::now_ms;

    fn sample() -> Session {
        let now = now_ms();
        Session {
            id: Uuid::nil(),
            name: "proj".to_string(),
            kind: SessionKind::Internal,
            agent: "claude".to_string(),
            status: SessionStatus::Working,
            cwd: "/tmp/proj".to_string(),
            created_at: now,
            last_activity: now,
            tmux_session: Some("cab-00000000".to_string()),
            agent_session_id: None,
            current_tool: None,
            terminal: None,
            transcript_path: None,
        }
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["createdAt"].as_i64(), Some(json["lastActivity"].as_i64().unwrap()));
        assert_eq!(json["tmuxSession"], "cab-00000000");
        assert_eq!(json["kind"], "internal");
        assert_eq!(json["status"], "working");
        assert!(json.get("agentSessionId").is_none());
        assert!(json.get("currentTool").is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Offline).unwrap(),
            "\"offline\""
        );
        assert_eq!(
            serde_json::to_string(&SessionKind::External).unwrap(),
            "\"external\""
        );
    }

    #[test]
    fn status_display_matches_serde() {
        for status in [
            SessionStatus::Working,
            SessionStatus::Idle,
            SessionStatus::Offline,
        ] {
            let displayed = status.to_string();
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", displayed));
        }
    }

    #[test]
    fn roundtrips_through_json() {
        let mut session = sample();
        session.agent_session_id = Some("A".to_string());
        session.current_tool = Some("Bash".to_string());
        session.terminal = Some(TerminalInfo {
            pane_id: Some("%1".to_string()),
            ..Default::default()
        });
        session.transcript_path = Some(PathBuf::from("/tmp/t.jsonl"));

        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn missing_optionals_deserialize_as_none() {
        let json = serde_json::json!({
            "id": Uuid::nil(),
            "name": "n",
            "kind": "external",
            "agent": "codex",
            "status": "idle",
            "cwd": "/tmp",
            "createdAt": 1,
            "lastActivity": 2,
        });
        let session: Session = serde_json::from_value(json).unwrap();
        assert!(session.tmux_session.is_none());
        assert!(session.agent_session_id.is_none());
        assert!(session.terminal.is_none());
    }
}
