//! Write-behind persistence of the session map.
//!
//! Mutations flip a dirty flag; a periodic loop calls `save()`, which is a
//! no-op while clean. Snapshots land via temp-file-plus-rename so readers
//! never observe a partial file. On load, internal sessions come back
//! offline with their terminal info cleared: tmux state does not survive a
//! bridge restart.

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::session::{Session, SessionKind, SessionStatus};

use super::{SessionSupervisor, SupervisorState};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PersistedState {
    pub(crate) sessions: Vec<Session>,
    pub(crate) agent_to_managed_map: Vec<(String, Uuid)>,
    pub(crate) session_counter: u64,
}

fn snapshot(state: &SupervisorState) -> PersistedState {
    let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
    sessions.sort_by_key(|s| s.created_at);
    let mut map: Vec<(String, Uuid)> = state
        .by_agent_id
        .iter()
        .map(|(agent_session_id, id)| (agent_session_id.clone(), *id))
        .collect();
    map.sort();
    PersistedState {
        sessions,
        agent_to_managed_map: map,
        session_counter: state.counter,
    }
}

fn write_snapshot(path: &Path, persisted: &PersistedState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(persisted)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl SessionSupervisor {
    /// Persist iff something changed since the last save.
    pub async fn save(&self) -> anyhow::Result<()> {
        if !self.state.read().await.dirty {
            return Ok(());
        }
        self.force_save().await
    }

    /// Persist unconditionally.
    pub async fn force_save(&self) -> anyhow::Result<()> {
        let persisted = {
            let mut state = self.state.write().await;
            state.dirty = false;
            snapshot(&state)
        };
        write_snapshot(&self.config.sessions_path, &persisted)
    }

    /// Replace in-memory state from disk. Missing file means a fresh start.
    pub async fn load(&self) -> anyhow::Result<()> {
        let path = &self.config.sessions_path;
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedState = serde_json::from_str(&content)?;

        let mut state = self.state.write().await;
        state.sessions.clear();
        state.by_agent_id.clear();

        for mut session in persisted.sessions {
            if session.kind == SessionKind::Internal {
                session.status = SessionStatus::Offline;
                session.terminal = None;
            }
            state.sessions.insert(session.id, session);
        }
        for (agent_session_id, id) in persisted.agent_to_managed_map {
            if state.sessions.contains_key(&id) {
                state.by_agent_id.insert(agent_session_id, id);
            }
        }
        state.counter = persisted.session_counter;
        state.dirty = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
