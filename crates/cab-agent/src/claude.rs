//! Claude Code adapter.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::adapter::{
    build_flag_command, is_command_available, normalize_hook_name, AdapterError, AgentAdapter,
    TranscriptMessage,
};
use crate::events::{ContentBlock, EventKind};
use crate::hook::terminal_from_payload;

const HOOK_NAMES: &[&str] = &[
    "PreToolUse",
    "PostToolUse",
    "Stop",
    "SubagentStop",
    "SessionStart",
    "SessionEnd",
    "UserPromptSubmit",
    "Notification",
];

pub struct ClaudeAdapter;

fn opt_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn opt_value(payload: &Value, key: &str) -> Option<Value> {
    payload.get(key).filter(|v| !v.is_null()).cloned()
}

/// Tool success: an explicit `success` wins, then the response's own
/// `success`/`is_error`, defaulting to success.
fn tool_success(payload: &Value) -> bool {
    if let Some(success) = payload.get("success").and_then(Value::as_bool) {
        return success;
    }
    if let Some(response) = payload.get("tool_response") {
        if let Some(success) = response.get("success").and_then(Value::as_bool) {
            return success;
        }
        if let Some(is_error) = response.get("is_error").and_then(Value::as_bool) {
            return !is_error;
        }
    }
    true
}

impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn build_command(&self, flags: &BTreeMap<String, String>) -> Result<String, AdapterError> {
        build_flag_command("claude", flags)
    }

    fn hook_names(&self) -> &'static [&'static str] {
        HOOK_NAMES
    }

    fn owns_payload(&self, payload: &Value) -> bool {
        payload.get("claude_session_id").is_some() || payload.get("hook_event_name").is_some()
    }

    fn matches_tool_shape(&self, payload: &Value) -> bool {
        payload.get("tool_name").is_some() && payload.get("tool_input").is_some()
    }

    fn parse_hook_event(&self, hook_name: &str, payload: &Value) -> Option<EventKind> {
        match normalize_hook_name(hook_name).as_str() {
            "pretooluse" => Some(EventKind::PreToolUse {
                tool: opt_str(payload, "tool_name")?,
                tool_input: opt_value(payload, "tool_input"),
                tool_use_id: opt_str(payload, "tool_use_id"),
            }),
            "posttooluse" => Some(EventKind::PostToolUse {
                tool: opt_str(payload, "tool_name")?,
                tool_input: opt_value(payload, "tool_input"),
                tool_response: opt_value(payload, "tool_response"),
                tool_use_id: opt_str(payload, "tool_use_id"),
                success: tool_success(payload),
                duration: payload.get("duration_ms").and_then(Value::as_i64),
            }),
            "stop" => Some(EventKind::Stop {
                stop_hook_active: payload
                    .get("stop_hook_active")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                response: opt_str(payload, "last_assistant_message")
                    .or_else(|| opt_str(payload, "response")),
            }),
            "subagentstop" => Some(EventKind::SubagentStop),
            "sessionstart" => Some(EventKind::SessionStart {
                source: opt_str(payload, "source").unwrap_or_else(|| "startup".to_string()),
                terminal: terminal_from_payload(payload),
            }),
            "sessionend" => Some(EventKind::SessionEnd),
            "userpromptsubmit" => Some(EventKind::UserPromptSubmit {
                prompt: opt_str(payload, "prompt"),
            }),
            "notification" => Some(EventKind::Notification {
                message: opt_str(payload, "message"),
                level: opt_str(payload, "level"),
            }),
            _ => None,
        }
    }

    fn extract_session_id(&self, payload: &Value) -> Option<String> {
        opt_str(payload, "claude_session_id").or_else(|| opt_str(payload, "session_id"))
    }

    fn parse_transcript_entry(&self, entry: &Value) -> Option<TranscriptMessage> {
        if entry.get("type").and_then(Value::as_str) != Some("assistant") {
            return None;
        }
        let message = entry.get("message")?;
        let blocks = message.get("content")?.as_array()?;

        let content = blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => Some(ContentBlock::Text {
                    text: block.get("text").and_then(Value::as_str)?.to_string(),
                }),
                Some("thinking") => Some(ContentBlock::Thinking {
                    text: block.get("thinking").and_then(Value::as_str)?.to_string(),
                }),
                Some("tool_use") => Some(ContentBlock::ToolUse {
                    tool_name: block.get("name").and_then(Value::as_str)?.to_string(),
                    tool_input: block.get("input").cloned().unwrap_or(Value::Null),
                    tool_use_id: block.get("id").and_then(Value::as_str).map(str::to_string),
                }),
                _ => None,
            })
            .collect();

        let request_id = entry
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                message
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        Some(TranscriptMessage {
            content,
            request_id,
        })
    }

    fn settings_path(&self) -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".claude").join("settings.json"))
    }

    fn install_hooks(&self, hook_script: &Path) -> anyhow::Result<()> {
        let path = self
            .settings_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut settings = read_settings(&path)?;
        install_into_settings(&mut settings, hook_script);
        write_settings(&path, &settings)
    }

    fn uninstall_hooks(&self, hook_script: &Path) -> anyhow::Result<()> {
        let path = self
            .settings_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        if !path.exists() {
            return Ok(());
        }
        let mut settings = read_settings(&path)?;
        uninstall_from_settings(&mut settings, hook_script);
        write_settings(&path, &settings)
    }

    fn is_available(&self) -> bool {
        is_command_available("claude")
    }
}

fn read_settings(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(json!({}));
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_settings(path: &Path, settings: &Value) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

fn bridge_entry(hook_script: &Path, hook_name: &str) -> Value {
    json!({
        "matcher": "*",
        "hooks": [{
            "type": "command",
            "command": format!("{} {}", hook_script.display(), hook_name),
        }],
    })
}

fn references_script(group: &Value, script: &str) -> bool {
    group
        .get("hooks")
        .and_then(Value::as_array)
        .map(|hooks| {
            hooks.iter().any(|h| {
                h.get("command")
                    .and_then(Value::as_str)
                    .is_some_and(|c| c.contains(script))
            })
        })
        .unwrap_or(false)
}

/// Drop any existing bridge groups for each hook point, then add exactly
/// one. Repeated installs therefore converge on a single entry.
pub(crate) fn install_into_settings(settings: &mut Value, hook_script: &Path) {
    let script = hook_script.display().to_string();
    if !settings.is_object() {
        *settings = json!({});
    }
    if settings.get("hooks").map_or(true, |h| !h.is_object()) {
        settings["hooks"] = json!({});
    }
    for hook_name in HOOK_NAMES {
        let groups = settings["hooks"]
            .get_mut(*hook_name)
            .and_then(Value::as_array_mut);
        match groups {
            Some(groups) => {
                groups.retain(|group| !references_script(group, &script));
                groups.push(bridge_entry(hook_script, hook_name));
            }
            None => {
                settings["hooks"][*hook_name] = json!([bridge_entry(hook_script, hook_name)]);
            }
        }
    }
}

pub(crate) fn uninstall_from_settings(settings: &mut Value, hook_script: &Path) {
    let script = hook_script.display().to_string();
    let hooks = match settings.get_mut("hooks").and_then(Value::as_object_mut) {
        Some(hooks) => hooks,
        None => return,
    };
    let mut empty_keys = Vec::new();
    for (name, groups) in hooks.iter_mut() {
        if let Some(groups) = groups.as_array_mut() {
            groups.retain(|group| !references_script(group, &script));
            if groups.is_empty() {
                empty_keys.push(name.clone());
            }
        }
    }
    for key in empty_keys {
        hooks.remove(&key);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
