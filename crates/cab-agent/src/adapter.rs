//! Per-assistant strategy objects.
//!
//! An adapter knows how to launch its assistant, recognize its hook
//! payloads, translate its native hook vocabulary into canonical event
//! kinds, and (for assistants that keep one) parse its transcript.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::events::{ContentBlock, EventKind};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid flag key: {0:?}")]
    InvalidFlagKey(String),
}

/// A structured assistant message parsed out of a transcript record.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub content: Vec<ContentBlock>,
    pub request_id: Option<String>,
}

pub trait AgentAdapter: Send + Sync {
    /// Registered name (`claude`, `codex`). Stable; used as the `agent`
    /// field on events and sessions.
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Build the shell command line typed into a fresh tmux session.
    /// Flag values are single-quoted so they survive `send-keys` without
    /// being interpreted by the shell.
    fn build_command(&self, flags: &BTreeMap<String, String>) -> Result<String, AdapterError>;

    /// The adapter's native hook vocabulary, used for payload detection.
    fn hook_names(&self) -> &'static [&'static str];

    /// Whether a payload carries this adapter's identifying keys.
    fn owns_payload(&self, payload: &Value) -> bool;

    /// Whether a payload's tool fields have this adapter's shape.
    fn matches_tool_shape(&self, _payload: &Value) -> bool {
        false
    }

    /// Map one native hook into a canonical event kind. `None` drops the
    /// payload.
    fn parse_hook_event(&self, hook_name: &str, payload: &Value) -> Option<EventKind>;

    /// The assistant's own session identifier, if the payload names one.
    fn extract_session_id(&self, payload: &Value) -> Option<String>;

    /// Parse one transcript record into a structured assistant message.
    /// Adapters without transcripts return `None` for everything.
    fn parse_transcript_entry(&self, _entry: &Value) -> Option<TranscriptMessage> {
        None
    }

    /// Location of the assistant's on-disk settings, when it has one.
    fn settings_path(&self) -> Option<PathBuf>;

    /// Register the bridge hook script in the assistant's settings.
    /// Idempotent: applying N times leaves exactly one bridge entry per
    /// hook point.
    fn install_hooks(&self, hook_script: &Path) -> anyhow::Result<()>;

    /// Remove every settings entry that references the bridge hook script.
    fn uninstall_hooks(&self, hook_script: &Path) -> anyhow::Result<()>;

    /// Whether the assistant binary is on PATH.
    fn is_available(&self) -> bool;
}

pub fn is_command_available(binary: &str) -> bool {
    std::process::Command::new("which")
        .arg(binary)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Flag keys must be alphanumeric with interior dashes: first and last
/// character alphanumeric, nothing else besides `-` anywhere.
pub(crate) fn valid_flag_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Single-quote a value for the shell; embedded single quotes become `'\''`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Assemble `<program> --key 'value' ...` with validated keys and quoted
/// values. `BTreeMap` keeps the flag order deterministic.
pub(crate) fn build_flag_command(
    program: &str,
    flags: &BTreeMap<String, String>,
) -> Result<String, AdapterError> {
    let mut command = program.to_string();
    for (key, value) in flags {
        if !valid_flag_key(key) {
            return Err(AdapterError::InvalidFlagKey(key.clone()));
        }
        command.push_str(" --");
        command.push_str(key);
        command.push(' ');
        command.push_str(&shell_quote(value));
    }
    Ok(command)
}

/// Normalize a hook name for comparison: lowercase with underscores
/// removed, so `PreToolUse` and `pre_tool_use` both become `pretooluse`.
pub(crate) fn normalize_hook_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn AgentAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn with_defaults() -> Self {
        Self::new(vec![
            Arc::new(crate::claude::ClaudeAdapter),
            Arc::new(crate::codex::CodexAdapter),
        ])
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AgentAdapter>> {
        self.adapters.iter()
    }

    /// Decide which adapter owns a payload. Checked in order: an explicit
    /// `agent` field, adapter-specific keys, hook-name membership in a
    /// native vocabulary, and finally the shape of the tool fields.
    pub fn detect(&self, payload: &Value, hook_name: Option<&str>) -> Option<Arc<dyn AgentAdapter>> {
        if let Some(agent) = payload.get("agent").and_then(Value::as_str) {
            if let Some(adapter) = self.get(agent) {
                return Some(adapter);
            }
        }

        if let Some(adapter) = self.adapters.iter().find(|a| a.owns_payload(payload)) {
            return Some(adapter.clone());
        }

        if let Some(hook_name) = hook_name {
            let normalized = normalize_hook_name(hook_name);
            if let Some(adapter) = self.adapters.iter().find(|a| {
                a.hook_names()
                    .iter()
                    .any(|n| normalize_hook_name(n) == normalized)
            }) {
                return Some(adapter.clone());
            }
        }

        self.adapters
            .iter()
            .find(|a| a.matches_tool_shape(payload))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
