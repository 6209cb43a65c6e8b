//! Hook-script generation and adapter hook installation.

use cab_agent::AdapterRegistry;
use cab_config::{BridgeConfig, DataPaths};

/// The shell script every assistant hook points at. It appends the enriched
/// payload to the events file (the source of truth) and best-effort POSTs it
/// to the running server with a 2 s cap.
pub fn hook_script_contents(config: &BridgeConfig, paths: &DataPaths) -> String {
    format!(
        r#"#!/usr/bin/env bash
# Captures one coding-agent hook payload from stdin, appends it to the
# bridge's events file, and forwards it to the bridge server if one is up.
set -u

HOOK_TYPE="${{1:-unknown}}"
AGENT="${{2:-claude}}"
EVENTS_FILE="{events}"
BRIDGE_URL="http://{addr}/event"

PAYLOAD="$(cat)"
[ -z "$PAYLOAD" ] && PAYLOAD='{{}}'

TMUX_SOCKET="${{TMUX:-}}"
TMUX_SOCKET="${{TMUX_SOCKET%%,*}}"

ENRICHED="$(printf '%s' "$PAYLOAD" | jq -c \
  --arg hook_type "$HOOK_TYPE" \
  --arg agent "$AGENT" \
  --arg tmux_pane "${{TMUX_PANE:-}}" \
  --arg tmux_socket "$TMUX_SOCKET" \
  --arg tty "$(tty 2>/dev/null || true)" \
  --argjson received_at "$(date +%s%3N)" \
  '. + {{hook_type: $hook_type, agent: $agent, tmux_pane: $tmux_pane, tmux_socket: $tmux_socket, tty: $tty, received_at: $received_at}}')" || ENRICHED="$PAYLOAD"

mkdir -p "$(dirname "$EVENTS_FILE")"
printf '%s\n' "$ENRICHED" >> "$EVENTS_FILE"

curl -s -m 2 -X POST -H 'Content-Type: application/json' \
  -d "$ENRICHED" "$BRIDGE_URL" >/dev/null 2>&1 || true

exit 0
"#,
        events = paths.events_path().display(),
        addr = config.bind_addr(),
    )
}

pub fn write_hook_script(config: &BridgeConfig, paths: &DataPaths) -> anyhow::Result<()> {
    paths.ensure_dirs()?;
    let script_path = paths.hook_script_path();
    std::fs::write(&script_path, hook_script_contents(config, paths))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn selected<'a>(
    registry: &'a AdapterRegistry,
    agent: Option<&'a str>,
) -> impl Iterator<Item = &'a std::sync::Arc<dyn cab_agent::AgentAdapter>> {
    registry
        .iter()
        .filter(move |a| agent.map_or(true, |name| a.name() == name))
}

/// Write the hook script and register it with each (selected, available)
/// assistant.
pub fn install(
    config: &BridgeConfig,
    paths: &DataPaths,
    registry: &AdapterRegistry,
    agent: Option<&str>,
) -> anyhow::Result<()> {
    write_hook_script(config, paths)?;
    let script = paths.hook_script_path();
    for adapter in selected(registry, agent) {
        if !adapter.is_available() {
            println!("{}: not installed, skipping", adapter.display_name());
            continue;
        }
        match adapter.install_hooks(&script) {
            Ok(()) => println!("{}: hooks installed", adapter.display_name()),
            Err(e) => println!("{}: hook install failed: {}", adapter.display_name(), e),
        }
    }
    println!("Hook script: {}", script.display());
    Ok(())
}

/// Remove the bridge entries from every (selected) assistant's settings.
/// Availability is not required: settings may outlive the binary.
pub fn uninstall(
    paths: &DataPaths,
    registry: &AdapterRegistry,
    agent: Option<&str>,
) -> anyhow::Result<()> {
    let script = paths.hook_script_path();
    for adapter in selected(registry, agent) {
        match adapter.uninstall_hooks(&script) {
            Ok(()) => println!("{}: hooks removed", adapter.display_name()),
            Err(e) => println!("{}: hook removal failed: {}", adapter.display_name(), e),
        }
    }
    if script.exists() {
        std::fs::remove_file(&script)?;
        println!("Removed {}", script.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
