//! End-to-end supervisor tests against a real tmux server. Each test
//! skips itself when tmux is missing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cab_agent::{
    AdapterRegistry, CreateOptions, HookDecoder, SessionKind, SessionStatus, SessionSupervisor,
    SupervisorConfig,
};
use cab_tmux::TmuxDriver;

fn supervisor(dir: &std::path::Path) -> Arc<SessionSupervisor> {
    SessionSupervisor::new(
        Arc::new(TmuxDriver::new()),
        Arc::new(AdapterRegistry::with_defaults()),
        SupervisorConfig {
            sessions_path: dir.join("sessions.json"),
            ..Default::default()
        },
    )
}

async fn skip_without_tmux() -> bool {
    if TmuxDriver::new().is_available().await {
        return false;
    }
    eprintln!("tmux not installed; skipping");
    true
}

#[tokio::test]
async fn created_session_links_to_first_matching_hook() {
    if skip_without_tmux().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let proj = dir.path().join("proj");
    std::fs::create_dir(&proj).unwrap();
    let sup = supervisor(dir.path());

    let created = sup
        .create(CreateOptions {
            cwd: Some(proj.to_string_lossy().into_owned()),
            agent: Some("claude".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.kind, SessionKind::Internal);
    assert_eq!(created.status, SessionStatus::Working);
    assert!(created.tmux_session.as_deref().unwrap().starts_with("cab-"));

    // First hook from the same cwd adopts the internal session.
    let decoder = HookDecoder::new(Arc::new(AdapterRegistry::with_defaults()));
    let processed = decoder
        .decode_value(&serde_json::json!({
            "hook_event_name": "SessionStart",
            "session_id": "A",
            "cwd": proj.to_string_lossy(),
            "source": "startup",
        }))
        .unwrap();
    sup.ingest(processed).await;

    let sessions = sup.list(&Default::default()).await;
    assert_eq!(sessions.len(), 1, "hook must not create a second session");
    assert_eq!(sessions[0].id, created.id);
    assert_eq!(sessions[0].agent_session_id.as_deref(), Some("A"));
    assert_eq!(sessions[0].status, SessionStatus::Working);

    sup.delete(&created.id).await.unwrap();
}

#[tokio::test]
async fn quoted_flag_value_does_not_execute() {
    if skip_without_tmux().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());

    let marker = dir.path().join("rce-marker");
    let mut flags = BTreeMap::new();
    flags.insert(
        "model".to_string(),
        format!("x; touch {}", marker.display()),
    );

    let created = sup
        .create(CreateOptions {
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            agent: Some("claude".to_string()),
            flags,
            ..Default::default()
        })
        .await
        .unwrap();

    // Give the shell ample time to have (not) run the injected command.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        !marker.exists(),
        "flag value escaped its quoting and executed"
    );

    sup.delete(&created.id).await.unwrap();
}

#[tokio::test]
async fn tmux_death_marks_session_offline_and_restart_revives() {
    if skip_without_tmux().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());

    let created = sup
        .create(CreateOptions {
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            agent: Some("claude".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let old_tmux = created.tmux_session.clone().unwrap();

    // Kill the tmux session out from under the bridge.
    TmuxDriver::new().kill_session(&old_tmux).await.unwrap();

    sup.run_tmux_health_check().await;
    assert_eq!(
        sup.get(&created.id).await.unwrap().status,
        SessionStatus::Offline
    );

    let restarted = sup.restart(&created.id).await.unwrap();
    assert_ne!(restarted.tmux_session.as_deref(), Some(old_tmux.as_str()));
    assert!(restarted.agent_session_id.is_none());
    assert_eq!(restarted.status, SessionStatus::Working);

    sup.delete(&created.id).await.unwrap();
}

#[tokio::test]
async fn delete_kills_backing_tmux_session() {
    if skip_without_tmux().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path());

    let created = sup
        .create(CreateOptions {
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            agent: Some("claude".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let tmux_name = created.tmux_session.clone().unwrap();

    let driver = TmuxDriver::new();
    assert!(driver.session_exists(&tmux_name).await.unwrap());

    sup.delete(&created.id).await.unwrap();
    assert!(!driver.session_exists(&tmux_name).await.unwrap());
}
