//! Normalizes arbitrary hook payloads into typed, routable events.
//!
//! Payloads arrive either as JSONL lines tailed from the events file or as
//! raw `POST /event` bodies. The decoder is stateless apart from the
//! adapter registry it consults.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::events::{AgentEvent, ProcessedEvent, TerminalInfo};

/// Hook-name fields consulted in order.
const HOOK_NAME_KEYS: &[&str] = &["hook_event_name", "hook_type", "type", "event_type"];

pub(crate) fn terminal_from_payload(payload: &Value) -> Option<TerminalInfo> {
    let info = TerminalInfo {
        pane_id: payload
            .get("tmux_pane")
            .and_then(Value::as_str)
            .map(str::to_string),
        socket: payload
            .get("tmux_socket")
            .and_then(Value::as_str)
            .map(str::to_string),
        tty: payload.get("tty").and_then(Value::as_str).map(str::to_string),
    };
    if info.is_empty() {
        None
    } else {
        Some(info)
    }
}

fn resolve_hook_name(payload: &Value) -> Option<String> {
    HOOK_NAME_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

pub struct HookDecoder {
    registry: Arc<AdapterRegistry>,
}

impl HookDecoder {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Decode one JSONL line. Parse failures are logged at debug level and
    /// dropped; a bad record never propagates.
    pub fn decode_line(&self, line: &str) -> Option<ProcessedEvent> {
        match serde_json::from_str::<Value>(line) {
            Ok(payload) => self.decode_value(&payload),
            Err(e) => {
                tracing::debug!(error = %e, "dropping unparseable hook line");
                None
            }
        }
    }

    /// Decode one payload into a `ProcessedEvent`, or drop it.
    pub fn decode_value(&self, payload: &Value) -> Option<ProcessedEvent> {
        if !payload.is_object() {
            tracing::debug!("dropping non-object hook payload");
            return None;
        }

        let adapter = self.registry.detect(payload, resolve_hook_name(payload).as_deref())?;
        let hook_name = resolve_hook_name(payload)?;
        let kind = adapter.parse_hook_event(&hook_name, payload)?;

        let agent = adapter.name().to_string();
        let agent_session_id = adapter
            .extract_session_id(payload)
            .or_else(|| str_field(payload, "claude_session_id"))
            .or_else(|| str_field(payload, "session_id"))
            .or_else(|| {
                // Codex hooks often omit any session identity; a tmux pane
                // is stable enough to stand in for one.
                if agent == "codex" {
                    str_field(payload, "tmux_pane").map(|pane| format!("{}-{}", agent, pane))
                } else {
                    None
                }
            })
            .or_else(|| str_field(payload, "tty").map(|tty| format!("{}-{}", agent, tty)));

        let agent_session_id = match agent_session_id {
            Some(id) => id,
            None => {
                tracing::debug!(agent = %agent, hook = %hook_name, "dropping hook with no session identity");
                return None;
            }
        };

        let terminal = terminal_from_payload(payload);
        let cwd = str_field(payload, "cwd").or_else(|| str_field(payload, "working_directory"));
        let transcript_path = str_field(payload, "transcript_path").map(PathBuf::from);

        let mut event = AgentEvent::new(&agent, kind);
        event.agent_session_id = Some(agent_session_id.clone());
        event.cwd = cwd.clone();

        Some(ProcessedEvent {
            event,
            agent_session_id,
            agent,
            terminal,
            cwd,
            transcript_path,
        })
    }
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::json;

    fn decoder() -> HookDecoder {
        HookDecoder::new(Arc::new(AdapterRegistry::with_defaults()))
    }

    // ── the happy path ───────────────────────────────────────────────

    #[test]
    fn decodes_claude_session_start() {
        let payload = json!({
            "hook_event_name": "SessionStart",
            "session_id": "A",
            "cwd": "/tmp/proj",
            "source": "startup",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert_eq!(processed.agent, "claude");
        assert_eq!(processed.agent_session_id, "A");
        assert_eq!(processed.cwd.as_deref(), Some("/tmp/proj"));
        assert!(matches!(processed.event.kind, EventKind::SessionStart { .. }));
        assert_eq!(processed.event.agent_session_id.as_deref(), Some("A"));
    }

    #[test]
    fn decodes_codex_tool_event_by_shape() {
        let payload = json!({
            "event_type": "tool_start",
            "thread_id": "C",
            "cwd": "/tmp/proj",
            "tool": "shell",
            "input": {"command": ["ls"]},
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert_eq!(processed.agent, "codex");
        assert_eq!(processed.agent_session_id, "C");
        assert!(matches!(processed.event.kind, EventKind::PreToolUse { .. }));
    }

    #[test]
    fn decode_line_roundtrips_json() {
        let line = r#"{"hook_event_name": "Stop", "session_id": "A", "stop_hook_active": false}"#;
        let processed = decoder().decode_line(line).unwrap();
        assert!(matches!(processed.event.kind, EventKind::Stop { .. }));
    }

    // ── drops ────────────────────────────────────────────────────────

    #[test]
    fn decode_line_drops_invalid_json() {
        assert!(decoder().decode_line("not json {").is_none());
    }

    #[test]
    fn drops_non_object_payload() {
        assert!(decoder().decode_value(&json!([1, 2, 3])).is_none());
        assert!(decoder().decode_value(&json!("string")).is_none());
    }

    #[test]
    fn drops_payload_with_no_matching_adapter() {
        let payload = json!({"mystery": "payload", "type": "unknown_kind"});
        assert!(decoder().decode_value(&payload).is_none());
    }

    #[test]
    fn drops_payload_without_hook_name() {
        // Owned by claude via its key, but no resolvable hook name.
        let payload = json!({"claude_session_id": "A"});
        assert!(decoder().decode_value(&payload).is_none());
    }

    #[test]
    fn drops_payload_without_session_identity() {
        let payload = json!({"hook_event_name": "Stop", "stop_hook_active": false});
        assert!(decoder().decode_value(&payload).is_none());
    }

    // ── hook-name resolution order ───────────────────────────────────

    #[test]
    fn hook_name_resolution_order() {
        let payload = json!({
            "hook_event_name": "Stop",
            "hook_type": "PreToolUse",
            "type": "Notification",
            "session_id": "A",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert!(matches!(processed.event.kind, EventKind::Stop { .. }));

        let payload = json!({
            "hook_type": "Notification",
            "session_id": "A",
            "claude_session_id": "A",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert!(matches!(processed.event.kind, EventKind::Notification { .. }));
    }

    // ── session-id fallback chain ────────────────────────────────────

    #[test]
    fn codex_falls_back_to_pane_identity() {
        let payload = json!({
            "agent": "codex",
            "event_type": "session_start",
            "tmux_pane": "%5",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert_eq!(processed.agent_session_id, "codex-%5");
    }

    #[test]
    fn claude_does_not_use_pane_identity() {
        let payload = json!({
            "agent": "claude",
            "hook_event_name": "Stop",
            "stop_hook_active": false,
            "tmux_pane": "%5",
        });
        assert!(decoder().decode_value(&payload).is_none());
    }

    #[test]
    fn tty_fallback_applies_to_any_agent() {
        let payload = json!({
            "agent": "claude",
            "hook_event_name": "Stop",
            "stop_hook_active": false,
            "tty": "/dev/ttys004",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert_eq!(processed.agent_session_id, "claude-/dev/ttys004");
    }

    // ── metadata extraction ──────────────────────────────────────────

    #[test]
    fn extracts_terminal_info() {
        let payload = json!({
            "hook_event_name": "SessionStart",
            "session_id": "A",
            "tmux_pane": "%2",
            "tmux_socket": "/tmp/tmux-1000/default",
            "tty": "/dev/ttys001",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        let terminal = processed.terminal.unwrap();
        assert_eq!(terminal.pane_id.as_deref(), Some("%2"));
        assert_eq!(terminal.socket.as_deref(), Some("/tmp/tmux-1000/default"));
        assert_eq!(terminal.tty.as_deref(), Some("/dev/ttys001"));
    }

    #[test]
    fn working_directory_is_cwd_fallback() {
        let payload = json!({
            "hook_event_name": "Stop",
            "session_id": "A",
            "working_directory": "/srv/app",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert_eq!(processed.cwd.as_deref(), Some("/srv/app"));
    }

    #[test]
    fn extracts_transcript_path() {
        let payload = json!({
            "hook_event_name": "SessionStart",
            "session_id": "A",
            "transcript_path": "/home/u/.claude/projects/x/A.jsonl",
        });
        let processed = decoder().decode_value(&payload).unwrap();
        assert_eq!(
            processed.transcript_path.as_deref(),
            Some(std::path::Path::new("/home/u/.claude/projects/x/A.jsonl"))
        );
    }

    // ── idempotence property ─────────────────────────────────────────

    #[test]
    fn same_line_twice_gives_fresh_ids() {
        let line = r#"{"hook_event_name": "Stop", "session_id": "A", "stop_hook_active": false}"#;
        let d = decoder();
        let first = d.decode_line(line).unwrap();
        let second = d.decode_line(line).unwrap();
        assert_eq!(first.agent, second.agent);
        assert_eq!(first.agent_session_id, second.agent_session_id);
        assert_eq!(first.event.kind, second.event.kind);
        assert_ne!(first.event.id, second.event.id);
    }
}
