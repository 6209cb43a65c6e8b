//! OpenAI Codex adapter.
//!
//! Codex reports a `thread_id` instead of a session id, uses `tool`/`input`
//! tool fields, and keeps no transcript the bridge can read, so
//! `parse_transcript_entry` stays at the trait default.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::adapter::{
    build_flag_command, is_command_available, normalize_hook_name, AdapterError, AgentAdapter,
};
use crate::events::EventKind;
use crate::hook::terminal_from_payload;

const HOOK_NAMES: &[&str] = &[
    "session_start",
    "session_end",
    "tool_start",
    "tool_end",
    "turn_complete",
    "user_message",
    "notification",
];

pub struct CodexAdapter;

fn opt_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn opt_value(payload: &Value, key: &str) -> Option<Value> {
    payload.get(key).filter(|v| !v.is_null()).cloned()
}

impl AgentAdapter for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn build_command(&self, flags: &BTreeMap<String, String>) -> Result<String, AdapterError> {
        build_flag_command("codex", flags)
    }

    fn hook_names(&self) -> &'static [&'static str] {
        HOOK_NAMES
    }

    fn owns_payload(&self, payload: &Value) -> bool {
        payload.get("thread_id").is_some()
    }

    fn matches_tool_shape(&self, payload: &Value) -> bool {
        payload.get("tool").is_some() && payload.get("input").is_some()
    }

    fn parse_hook_event(&self, hook_name: &str, payload: &Value) -> Option<EventKind> {
        match normalize_hook_name(hook_name).as_str() {
            "toolstart" => Some(EventKind::PreToolUse {
                tool: opt_str(payload, "tool")?,
                tool_input: opt_value(payload, "input"),
                tool_use_id: opt_str(payload, "call_id"),
            }),
            "toolend" => Some(EventKind::PostToolUse {
                tool: opt_str(payload, "tool")?,
                tool_input: opt_value(payload, "input"),
                tool_response: opt_value(payload, "output"),
                tool_use_id: opt_str(payload, "call_id"),
                success: payload
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                duration: payload.get("duration_ms").and_then(Value::as_i64),
            }),
            "turncomplete" => Some(EventKind::Stop {
                stop_hook_active: false,
                response: opt_str(payload, "last_agent_message"),
            }),
            "sessionstart" => Some(EventKind::SessionStart {
                source: opt_str(payload, "source").unwrap_or_else(|| "startup".to_string()),
                terminal: terminal_from_payload(payload),
            }),
            "sessionend" => Some(EventKind::SessionEnd),
            "usermessage" => Some(EventKind::UserPromptSubmit {
                prompt: opt_str(payload, "message").or_else(|| opt_str(payload, "prompt")),
            }),
            "notification" => Some(EventKind::Notification {
                message: opt_str(payload, "message"),
                level: opt_str(payload, "level"),
            }),
            _ => None,
        }
    }

    fn extract_session_id(&self, payload: &Value) -> Option<String> {
        opt_str(payload, "thread_id").or_else(|| opt_str(payload, "session_id"))
    }

    fn settings_path(&self) -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".codex").join("config.toml"))
    }

    fn install_hooks(&self, hook_script: &Path) -> anyhow::Result<()> {
        let path = self
            .settings_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut config = read_config(&path)?;
        set_notify(&mut config, hook_script);
        std::fs::write(&path, toml::to_string_pretty(&config)?)?;
        Ok(())
    }

    fn uninstall_hooks(&self, hook_script: &Path) -> anyhow::Result<()> {
        let path = self
            .settings_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        if !path.exists() {
            return Ok(());
        }
        let mut config = read_config(&path)?;
        if clear_notify(&mut config, hook_script) {
            std::fs::write(&path, toml::to_string_pretty(&config)?)?;
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        is_command_available("codex")
    }
}

fn read_config(path: &Path) -> anyhow::Result<toml::Table> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content.parse::<toml::Table>()?)
}

/// Point the `notify` program at the bridge hook script. Setting the key
/// outright makes repeated installs converge on a single entry.
pub(crate) fn set_notify(config: &mut toml::Table, hook_script: &Path) {
    config.insert(
        "notify".to_string(),
        toml::Value::Array(vec![toml::Value::String(
            hook_script.display().to_string(),
        )]),
    );
}

/// Remove `notify` iff it references the bridge script. Returns whether the
/// config changed.
pub(crate) fn clear_notify(config: &mut toml::Table, hook_script: &Path) -> bool {
    let script = hook_script.display().to_string();
    let ours = config
        .get("notify")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .any(|v| v.as_str().is_some_and(|s| s.contains(&script)))
        })
        .unwrap_or(false);
    if ours {
        config.remove("notify");
    }
    ours
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> CodexAdapter {
        CodexAdapter
    }

    #[test]
    fn build_command_uses_codex_binary() {
        let mut flags = BTreeMap::new();
        flags.insert("model".to_string(), "o3".to_string());
        assert_eq!(
            adapter().build_command(&flags).unwrap(),
            "codex --model 'o3'"
        );
    }

    #[test]
    fn parses_tool_start_as_pre_tool_use() {
        let payload = json!({
            "event_type": "tool_start",
            "thread_id": "T",
            "tool": "shell",
            "input": {"command": ["ls"]},
            "call_id": "c-1",
        });
        let kind = adapter().parse_hook_event("tool_start", &payload).unwrap();
        match kind {
            EventKind::PreToolUse {
                tool,
                tool_input,
                tool_use_id,
            } => {
                assert_eq!(tool, "shell");
                assert!(tool_input.is_some());
                assert_eq!(tool_use_id.as_deref(), Some("c-1"));
            }
            other => panic!("expected PreToolUse, got {:?}", other),
        }
    }

    #[test]
    fn parses_tool_end_as_post_tool_use() {
        let payload = json!({
            "tool": "shell",
            "input": {},
            "output": {"stdout": "ok"},
            "success": false,
            "duration_ms": 88,
        });
        let kind = adapter().parse_hook_event("tool_end", &payload).unwrap();
        match kind {
            EventKind::PostToolUse {
                success, duration, ..
            } => {
                assert!(!success);
                assert_eq!(duration, Some(88));
            }
            other => panic!("expected PostToolUse, got {:?}", other),
        }
    }

    #[test]
    fn parses_turn_complete_as_stop() {
        let payload = json!({"last_agent_message": "done"});
        let kind = adapter().parse_hook_event("turn_complete", &payload).unwrap();
        match kind {
            EventKind::Stop {
                stop_hook_active,
                response,
            } => {
                assert!(!stop_hook_active);
                assert_eq!(response.as_deref(), Some("done"));
            }
            other => panic!("expected Stop, got {:?}", other),
        }
    }

    #[test]
    fn parses_user_message_as_prompt_submit() {
        let payload = json!({"message": "do the thing"});
        let kind = adapter().parse_hook_event("user_message", &payload).unwrap();
        assert!(matches!(
            kind,
            EventKind::UserPromptSubmit { prompt: Some(p) } if p == "do the thing"
        ));
    }

    #[test]
    fn tool_start_without_tool_is_dropped() {
        assert!(adapter()
            .parse_hook_event("tool_start", &json!({"input": {}}))
            .is_none());
    }

    #[test]
    fn extract_session_id_uses_thread_id() {
        let payload = json!({"thread_id": "T-9"});
        assert_eq!(adapter().extract_session_id(&payload).as_deref(), Some("T-9"));
        assert!(adapter().extract_session_id(&json!({})).is_none());
    }

    #[test]
    fn no_transcript_support() {
        let entry = json!({"type": "assistant", "message": {"content": []}});
        assert!(adapter().parse_transcript_entry(&entry).is_none());
    }

    // ── notify config ────────────────────────────────────────────────

    #[test]
    fn set_notify_points_at_script() {
        let mut config = toml::Table::new();
        set_notify(&mut config, Path::new("/data/hooks/coding-agent-hook.sh"));
        let arr = config["notify"].as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0].as_str().unwrap(), "/data/hooks/coding-agent-hook.sh");
    }

    #[test]
    fn set_notify_is_idempotent() {
        let mut config = toml::Table::new();
        let script = Path::new("/data/hooks/coding-agent-hook.sh");
        set_notify(&mut config, script);
        set_notify(&mut config, script);
        assert_eq!(config["notify"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn clear_notify_only_removes_bridge_entry() {
        let mut config = toml::Table::new();
        config.insert(
            "notify".to_string(),
            toml::Value::Array(vec![toml::Value::String("/other/notify.sh".to_string())]),
        );
        let changed = clear_notify(&mut config, Path::new("/data/hooks/coding-agent-hook.sh"));
        assert!(!changed);
        assert!(config.contains_key("notify"));

        set_notify(&mut config, Path::new("/data/hooks/coding-agent-hook.sh"));
        let changed = clear_notify(&mut config, Path::new("/data/hooks/coding-agent-hook.sh"));
        assert!(changed);
        assert!(!config.contains_key("notify"));
    }

    #[test]
    fn settings_path_is_under_home() {
        let path = adapter().settings_path().unwrap();
        assert!(path.ends_with(".codex/config.toml"));
    }
}
