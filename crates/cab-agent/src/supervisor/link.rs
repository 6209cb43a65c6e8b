//! The session-linking algorithm.
//!
//! Resolves an incoming `(agentSessionId, agent, cwd)` triple to a session,
//! preferring (1) an existing mapping, then (2) an unlinked internal
//! session of the *same agent* with the same canonical cwd created inside
//! the linking window, and finally (3) a fresh external session. A session
//! is linked at most once; only `restart` severs the link.

use std::path::PathBuf;
use uuid::Uuid;

use crate::events::{now_ms, TerminalInfo};
use crate::session::{Session, SessionKind, SessionStatus};

use super::{basename, SessionSignal, SessionSupervisor};

/// Symlink-resolved form of a path, or the raw string when resolution
/// fails (the directory may no longer exist).
pub(crate) fn canonicalize_cwd(path: &str) -> String {
    std::fs::canonicalize(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}

struct PendingReader {
    session_id: Uuid,
    agent_session_id: String,
    cwd: Option<String>,
    agent: String,
    path: PathBuf,
}

impl SessionSupervisor {
    pub async fn find_or_create(
        &self,
        agent_session_id: &str,
        agent: &str,
        cwd: Option<&str>,
        terminal: Option<TerminalInfo>,
        transcript_path: Option<PathBuf>,
    ) -> Session {
        let canonical_cwd = cwd.map(canonicalize_cwd);
        let mut pending_reader: Option<PendingReader> = None;

        // Step 1: an existing mapping wins.
        let existing = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            match state.by_agent_id.get(agent_session_id).copied() {
                Some(id) if state.sessions.contains_key(&id) => {
                    let session = state.sessions.get_mut(&id).expect("checked above");
                    if let Some(terminal) = &terminal {
                        session.terminal = Some(terminal.clone());
                        state.dirty = true;
                    }
                    if session.transcript_path.is_none() {
                        if let Some(path) = &transcript_path {
                            session.transcript_path = Some(path.clone());
                            pending_reader = Some(PendingReader {
                                session_id: id,
                                agent_session_id: agent_session_id.to_string(),
                                cwd: Some(session.cwd.clone()),
                                agent: session.agent.clone(),
                                path: path.clone(),
                            });
                            state.dirty = true;
                        }
                    }
                    Some(state.sessions[&id].clone())
                }
                Some(_) => {
                    // Mapping points at a deleted session; drop it.
                    state.by_agent_id.remove(agent_session_id);
                    None
                }
                None => None,
            }
        };
        if let Some(session) = existing {
            self.spawn_pending(pending_reader).await;
            return session;
        }

        // Step 2: adopt an unlinked internal session.
        let now = now_ms();
        let linked = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let window = self.config.linking_window_ms;
            let candidate = state.sessions.values_mut().find(|s| {
                s.kind == SessionKind::Internal
                    && s.agent_session_id.is_none()
                    && s.agent == agent
                    && canonical_cwd
                        .as_deref()
                        .is_some_and(|incoming| canonicalize_cwd(&s.cwd) == incoming)
                    && now - s.created_at <= window
            });
            match candidate {
                Some(session) => {
                    session.agent_session_id = Some(agent_session_id.to_string());
                    if let Some(terminal) = &terminal {
                        session.terminal = Some(terminal.clone());
                    }
                    if session.transcript_path.is_none() {
                        if let Some(path) = &transcript_path {
                            session.transcript_path = Some(path.clone());
                            pending_reader = Some(PendingReader {
                                session_id: session.id,
                                agent_session_id: agent_session_id.to_string(),
                                cwd: Some(session.cwd.clone()),
                                agent: session.agent.clone(),
                                path: path.clone(),
                            });
                        }
                    }
                    let linked = session.clone();
                    state.by_agent_id.insert(agent_session_id.to_string(), linked.id);
                    state.dirty = true;
                    Some(linked)
                }
                None => None,
            }
        };
        if let Some(session) = linked {
            self.spawn_pending(pending_reader).await;
            return session;
        }

        // Step 3: a fresh external session.
        let name = canonical_cwd
            .as_deref()
            .and_then(basename)
            .unwrap_or_else(|| {
                let short: String = agent_session_id.chars().take(8).collect();
                format!("{}-{}", agent, short)
            });
        let session = Session {
            id: Uuid::new_v4(),
            name,
            kind: SessionKind::External,
            agent: agent.to_string(),
            status: SessionStatus::Working,
            cwd: canonical_cwd.unwrap_or_default(),
            created_at: now,
            last_activity: now,
            tmux_session: None,
            agent_session_id: Some(agent_session_id.to_string()),
            current_tool: None,
            terminal,
            transcript_path: transcript_path.clone(),
        };

        if self.config.track_external {
            {
                let mut state = self.state.write().await;
                state
                    .by_agent_id
                    .insert(agent_session_id.to_string(), session.id);
                state.sessions.insert(session.id, session.clone());
                state.dirty = true;
            }
            self.emit(SessionSignal::Created(session.clone()));
        }
        // Ephemeral or not, a transcript still gets a reader.
        if let Some(path) = transcript_path {
            self.start_reader(
                session.id,
                agent_session_id.to_string(),
                Some(session.cwd.clone()),
                agent,
                path,
            )
            .await;
        }
        session
    }

    async fn spawn_pending(&self, pending: Option<PendingReader>) {
        if let Some(pending) = pending {
            self.start_reader(
                pending.session_id,
                pending.agent_session_id,
                pending.cwd,
                &pending.agent,
                pending.path,
            )
            .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
