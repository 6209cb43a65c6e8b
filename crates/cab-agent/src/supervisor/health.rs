//! Periodic reconciliation: tmux liveness, working timeouts, and cleanup.

use std::collections::HashSet;
use uuid::Uuid;

use crate::events::now_ms;
use crate::session::{SessionKind, SessionStatus};

use super::SessionSupervisor;

/// A working session that has been quiet past the timeout falls to idle.
pub(crate) fn working_timed_out(
    status: SessionStatus,
    last_activity: i64,
    now: i64,
    timeout_ms: i64,
) -> bool {
    status == SessionStatus::Working && now - last_activity > timeout_ms
}

/// The status a tmux-liveness observation drives an internal session into.
/// A dead tmux session means offline; a session that reappears after being
/// offline comes back as idle (not working — nothing says it is busy).
pub(crate) fn liveness_transition(
    status: SessionStatus,
    tmux_alive: bool,
) -> Option<SessionStatus> {
    if !tmux_alive && status != SessionStatus::Offline {
        Some(SessionStatus::Offline)
    } else if tmux_alive && status == SessionStatus::Offline {
        Some(SessionStatus::Idle)
    } else {
        None
    }
}

impl SessionSupervisor {
    /// Compare every internal session against the live tmux session list.
    pub async fn run_tmux_health_check(&self) {
        let live: HashSet<String> = match self.tmux.list_sessions().await {
            Ok(sessions) => sessions.into_iter().map(|s| s.name).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "tmux liveness check failed");
                return;
            }
        };

        let changes: Vec<(Uuid, SessionStatus)> = {
            let state = self.state.read().await;
            state
                .sessions
                .values()
                .filter(|s| s.kind == SessionKind::Internal)
                .filter_map(|s| {
                    let tmux_name = s.tmux_session.as_ref()?;
                    liveness_transition(s.status, live.contains(tmux_name))
                        .map(|next| (s.id, next))
                })
                .collect()
        };

        for (id, status) in changes {
            self.apply_status(&id, status).await;
        }
    }

    /// Push long-quiet working sessions to idle.
    pub async fn run_working_timeout_check(&self) {
        let now = now_ms();
        let timeout = self.config.working_timeout_ms;
        let timed_out: Vec<Uuid> = {
            let state = self.state.read().await;
            state
                .sessions
                .values()
                .filter(|s| working_timed_out(s.status, s.last_activity, now, timeout))
                .map(|s| s.id)
                .collect()
        };
        for id in timed_out {
            self.apply_status(&id, SessionStatus::Idle).await;
        }
    }

    /// Delete internal sessions that stayed offline past the offline
    /// threshold, and any session untouched past the staleness threshold.
    pub async fn run_cleanup(&self) {
        let now = now_ms();
        let offline_cutoff = self.config.offline_cleanup_ms;
        let stale_cutoff = self.config.stale_cleanup_ms;

        let doomed: Vec<Uuid> = {
            let state = self.state.read().await;
            state
                .sessions
                .values()
                .filter(|s| {
                    let idle_for = now - s.last_activity;
                    let offline_expired = s.kind == SessionKind::Internal
                        && s.status == SessionStatus::Offline
                        && idle_for > offline_cutoff;
                    offline_expired || idle_for > stale_cutoff
                })
                .map(|s| s.id)
                .collect()
        };

        for id in doomed {
            tracing::info!(session = %id, "cleaning up expired session");
            let _ = self.delete(&id).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
