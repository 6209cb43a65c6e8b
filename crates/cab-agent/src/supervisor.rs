//! The session state machine.
//!
//! All session mutation flows through this one structure; the I/O pumps
//! (events-file tailer, transcript readers, HTTP handlers) are producers
//! that call into it. Outbound notifications leave through a single
//! broadcast channel of tagged [`SessionSignal`]s.

mod health;
mod link;
mod persist;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use cab_tmux::{CreateSessionOptions, PasteBuffer, TmuxDriver, TmuxError};

use crate::adapter::{AdapterError, AdapterRegistry};
use crate::events::{now_ms, AgentEvent, EventKind, ProcessedEvent};
use crate::session::{Session, SessionKind, SessionStatus};
use crate::transcript::{TranscriptReader, TranscriptUpdate};

const TMUX_HEALTH_INTERVAL: Duration = Duration::from_secs(10);
const WORKING_TIMEOUT_INTERVAL: Duration = Duration::from_secs(10);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const SAVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub sessions_path: PathBuf,
    pub default_agent: String,
    pub track_external: bool,
    pub linking_window_ms: i64,
    pub working_timeout_ms: i64,
    pub offline_cleanup_ms: i64,
    pub stale_cleanup_ms: i64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sessions_path: PathBuf::from("sessions.json"),
            default_agent: "claude".to_string(),
            track_external: true,
            linking_window_ms: 5 * 60 * 1000,
            working_timeout_ms: 120_000,
            offline_cleanup_ms: 60 * 60 * 1000,
            stale_cleanup_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no adapter registered for agent {0:?}")]
    NoAdapter(String),

    #[error("session not found")]
    NotFound,

    #[error("session has no terminal to receive input")]
    NoTerminal,

    #[error("session is offline")]
    Offline,

    #[error("operation requires an internal session")]
    NotInternal,

    #[error("restart requires an offline session")]
    NotOffline,

    #[error(transparent)]
    Flags(#[from] AdapterError),

    #[error(transparent)]
    Tmux(#[from] TmuxError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub cwd: Option<String>,
    pub agent: Option<String>,
    pub flags: BTreeMap<String, String>,
    pub spawn_terminal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kind: Option<SessionKind>,
    pub agent: Option<String>,
    pub status: Option<SessionStatus>,
}

/// Everything the supervisor tells the outside world.
#[derive(Debug, Clone)]
pub enum SessionSignal {
    Created(Session),
    Updated(Session),
    Deleted(Session),
    Status {
        session: Session,
        old: SessionStatus,
        new: SessionStatus,
    },
    Event(AgentEvent),
}

pub(crate) struct SupervisorState {
    pub(crate) sessions: HashMap<Uuid, Session>,
    pub(crate) by_agent_id: HashMap<String, Uuid>,
    pub(crate) counter: u64,
    pub(crate) dirty: bool,
}

impl SupervisorState {
    fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            by_agent_id: HashMap::new(),
            counter: 0,
            dirty: false,
        }
    }
}

pub struct SessionSupervisor {
    pub(crate) tmux: Arc<TmuxDriver>,
    pub(crate) registry: Arc<AdapterRegistry>,
    pub(crate) config: SupervisorConfig,
    pub(crate) state: RwLock<SupervisorState>,
    pub(crate) readers: Mutex<HashMap<Uuid, TranscriptReader>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    signals_tx: broadcast::Sender<SessionSignal>,
    pub(crate) transcript_tx: mpsc::Sender<TranscriptUpdate>,
    transcript_rx: Mutex<Option<mpsc::Receiver<TranscriptUpdate>>>,
}

/// The status a canonical event kind drives a session into, if any.
pub(crate) fn transition_for(kind: &EventKind) -> Option<SessionStatus> {
    match kind {
        EventKind::SessionStart { .. }
        | EventKind::UserPromptSubmit { .. }
        | EventKind::PreToolUse { .. } => Some(SessionStatus::Working),
        EventKind::Stop { .. } | EventKind::SubagentStop => Some(SessionStatus::Idle),
        EventKind::SessionEnd => Some(SessionStatus::Offline),
        EventKind::PostToolUse { .. }
        | EventKind::Notification { .. }
        | EventKind::AssistantMessage { .. } => None,
    }
}

pub(crate) fn basename(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn resolve_cwd(requested: Option<&str>) -> String {
    let candidate = requested
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    match std::fs::canonicalize(&candidate) {
        Ok(resolved) => resolved.to_string_lossy().into_owned(),
        Err(_) => dirs::home_dir()
            .and_then(|home| std::fs::canonicalize(home).ok())
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .to_string_lossy()
            .into_owned(),
    }
}

/// Attach a platform terminal to the tmux session. Fire-and-forget; a
/// failure here never fails session creation.
fn spawn_terminal_emulator(tmux_name: &str) {
    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("osascript")
        .arg("-e")
        .arg(format!(
            "tell application \"Terminal\" to do script \"tmux attach -t {}\"",
            tmux_name
        ))
        .spawn();
    #[cfg(not(target_os = "macos"))]
    let result = std::process::Command::new("x-terminal-emulator")
        .args(["-e", "tmux", "attach", "-t", tmux_name])
        .spawn();

    if let Err(e) = result {
        tracing::debug!(session = tmux_name, error = %e, "terminal spawn failed");
    }
}

impl SessionSupervisor {
    pub fn new(
        tmux: Arc<TmuxDriver>,
        registry: Arc<AdapterRegistry>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let (signals_tx, _) = broadcast::channel(512);
        let (transcript_tx, transcript_rx) = mpsc::channel(256);
        Arc::new(Self {
            tmux,
            registry,
            config,
            state: RwLock::new(SupervisorState::new()),
            readers: Mutex::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
            signals_tx,
            transcript_tx,
            transcript_rx: Mutex::new(Some(transcript_rx)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals_tx.subscribe()
    }

    pub(crate) fn emit(&self, signal: SessionSignal) {
        let _ = self.signals_tx.send(signal);
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Begin the health, timeout, cleanup, and persistence loops, plus the
    /// transcript pump. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return;
        }

        if let Some(rx) = self.transcript_rx.lock().await.take() {
            let sup = Arc::clone(self);
            loops.push(tokio::spawn(sup.run_transcript_pump(rx)));
        }

        let sup = Arc::clone(self);
        loops.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(TMUX_HEALTH_INTERVAL);
            loop {
                tick.tick().await;
                sup.run_tmux_health_check().await;
            }
        }));

        let sup = Arc::clone(self);
        loops.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(WORKING_TIMEOUT_INTERVAL);
            loop {
                tick.tick().await;
                sup.run_working_timeout_check().await;
            }
        }));

        let sup = Arc::clone(self);
        loops.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tick.tick().await;
                sup.run_cleanup().await;
            }
        }));

        let sup = Arc::clone(self);
        loops.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(SAVE_INTERVAL);
            loop {
                tick.tick().await;
                if let Err(e) = sup.save().await {
                    tracing::error!(error = %e, "failed to persist sessions");
                }
            }
        }));
        drop(loops);

        self.resume_transcript_readers().await;
    }

    /// Cancel the loops, stop every transcript reader (awaiting their
    /// completion), and force a final save.
    pub async fn stop(&self) {
        let mut loops = self.loops.lock().await;
        for task in loops.drain(..) {
            task.abort();
        }
        drop(loops);

        let readers: Vec<TranscriptReader> = {
            let mut readers = self.readers.lock().await;
            readers.drain().map(|(_, reader)| reader).collect()
        };
        for reader in readers {
            reader.stop().await;
        }

        if let Err(e) = self.force_save().await {
            tracing::error!(error = %e, "failed to persist sessions on shutdown");
        }
    }

    async fn run_transcript_pump(self: Arc<Self>, mut rx: mpsc::Receiver<TranscriptUpdate>) {
        while let Some(update) = rx.recv().await {
            self.touch(&update.session_id).await;
            self.emit(SessionSignal::Event(update.event));
        }
    }

    async fn resume_transcript_readers(&self) {
        let resumable: Vec<(Uuid, String, String, String, PathBuf)> = {
            let state = self.state.read().await;
            state
                .sessions
                .values()
                .filter_map(|s| {
                    let path = s.transcript_path.clone()?;
                    Some((
                        s.id,
                        s.agent_session_id.clone().unwrap_or_default(),
                        s.cwd.clone(),
                        s.agent.clone(),
                        path,
                    ))
                })
                .collect()
        };
        for (id, agent_session_id, cwd, agent, path) in resumable {
            self.start_reader(id, agent_session_id, Some(cwd), &agent, path)
                .await;
        }
    }

    pub(crate) async fn start_reader(
        &self,
        session_id: Uuid,
        agent_session_id: String,
        cwd: Option<String>,
        agent: &str,
        path: PathBuf,
    ) {
        let Some(adapter) = self.registry.get(agent) else {
            return;
        };
        let mut readers = self.readers.lock().await;
        if readers.contains_key(&session_id) {
            return;
        }
        let reader = TranscriptReader::spawn(
            session_id,
            agent_session_id,
            cwd.filter(|c| !c.is_empty()),
            adapter,
            path,
            self.transcript_tx.clone(),
        );
        readers.insert(session_id, reader);
    }

    // ── CRUD ─────────────────────────────────────────────────────────

    pub async fn create(&self, opts: CreateOptions) -> Result<Session, SupervisorError> {
        let agent_name = opts
            .agent
            .clone()
            .unwrap_or_else(|| self.config.default_agent.clone());
        let adapter = self
            .registry
            .get(&agent_name)
            .ok_or_else(|| SupervisorError::NoAdapter(agent_name.clone()))?;
        let command = adapter.build_command(&opts.flags)?;

        let id = Uuid::new_v4();
        let tmux_name = format!("cab-{}", &id.to_string()[..8]);
        let cwd = resolve_cwd(opts.cwd.as_deref());

        self.tmux
            .create_session(
                &tmux_name,
                &CreateSessionOptions {
                    cwd: Some(cwd.clone()),
                    command: Some(command),
                    width: None,
                    height: None,
                },
            )
            .await?;

        if opts.spawn_terminal {
            spawn_terminal_emulator(&tmux_name);
        }

        let now = now_ms();
        let session = {
            let mut state = self.state.write().await;
            let name = match opts.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                Some(name) => name.to_string(),
                None => match basename(&cwd) {
                    Some(base) => base,
                    None => {
                        state.counter += 1;
                        format!("session-{}", state.counter)
                    }
                },
            };
            let session = Session {
                id,
                name,
                kind: SessionKind::Internal,
                agent: agent_name,
                status: SessionStatus::Working,
                cwd,
                created_at: now,
                last_activity: now,
                tmux_session: Some(tmux_name),
                agent_session_id: None,
                current_tool: None,
                terminal: None,
                transcript_path: None,
            };
            state.sessions.insert(id, session.clone());
            state.dirty = true;
            session
        };

        self.emit(SessionSignal::Created(session.clone()));
        Ok(session)
    }

    pub async fn get(&self, id: &Uuid) -> Option<Session> {
        self.state.read().await.sessions.get(id).cloned()
    }

    pub async fn list(&self, filter: &ListFilter) -> Vec<Session> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| filter.kind.map_or(true, |k| s.kind == k))
            .filter(|s| filter.agent.as_deref().map_or(true, |a| s.agent == a))
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn update_name(&self, id: &Uuid, name: String) -> Result<Session, SupervisorError> {
        let session = {
            let mut state = self.state.write().await;
            let session = state
                .sessions
                .get_mut(id)
                .ok_or(SupervisorError::NotFound)?;
            session.name = name;
            let session = session.clone();
            state.dirty = true;
            session
        };
        self.emit(SessionSignal::Updated(session.clone()));
        Ok(session)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<Session, SupervisorError> {
        let session = {
            let mut state = self.state.write().await;
            let session = state.sessions.remove(id).ok_or(SupervisorError::NotFound)?;
            if let Some(agent_session_id) = &session.agent_session_id {
                state.by_agent_id.remove(agent_session_id);
            }
            state.dirty = true;
            session
        };

        if session.kind == SessionKind::Internal {
            if let Some(tmux_name) = &session.tmux_session {
                // Failures are logged inside the driver and swallowed.
                let _ = self.tmux.kill_session(tmux_name).await;
            }
        }

        if let Some(reader) = self.readers.lock().await.remove(id) {
            reader.stop().await;
        }

        self.emit(SessionSignal::Deleted(session.clone()));
        Ok(session)
    }

    // ── control ──────────────────────────────────────────────────────

    pub async fn send_prompt(&self, id: &Uuid, text: &str) -> Result<(), SupervisorError> {
        let session = self.get(id).await.ok_or(SupervisorError::NotFound)?;
        match session.kind {
            SessionKind::External => {
                let terminal = session.terminal.as_ref().ok_or(SupervisorError::NoTerminal)?;
                let (pane, socket) = match (&terminal.pane_id, &terminal.socket) {
                    (Some(pane), Some(socket)) => (pane.clone(), socket.clone()),
                    _ => return Err(SupervisorError::NoTerminal),
                };
                self.tmux
                    .paste_buffer(&PasteBuffer {
                        target: pane,
                        text: text.to_string(),
                        is_pane_id: true,
                        socket: Some(socket),
                        send_enter: true,
                    })
                    .await?;
                Ok(())
            }
            SessionKind::Internal => {
                let tmux_name = session
                    .tmux_session
                    .clone()
                    .ok_or(SupervisorError::NoTerminal)?;
                if session.status == SessionStatus::Offline {
                    return Err(SupervisorError::Offline);
                }
                self.tmux
                    .paste_buffer(&PasteBuffer {
                        target: tmux_name,
                        text: text.to_string(),
                        is_pane_id: false,
                        socket: None,
                        send_enter: true,
                    })
                    .await?;
                self.apply_status(id, SessionStatus::Working).await;
                Ok(())
            }
        }
    }

    pub async fn cancel(&self, id: &Uuid) -> Result<(), SupervisorError> {
        let session = self.get(id).await.ok_or(SupervisorError::NotFound)?;
        if session.kind != SessionKind::Internal {
            return Err(SupervisorError::NotInternal);
        }
        let tmux_name = session.tmux_session.ok_or(SupervisorError::NoTerminal)?;
        self.tmux.send_interrupt(&tmux_name).await?;
        Ok(())
    }

    /// Recreate an offline internal session under a fresh tmux name. The
    /// fresh name carries a monotonic component so it always differs from
    /// the previous one; the old agent-session link is severed.
    pub async fn restart(&self, id: &Uuid) -> Result<Session, SupervisorError> {
        let session = self.get(id).await.ok_or(SupervisorError::NotFound)?;
        if session.kind != SessionKind::Internal {
            return Err(SupervisorError::NotInternal);
        }
        if session.status != SessionStatus::Offline {
            return Err(SupervisorError::NotOffline);
        }
        let adapter = self
            .registry
            .get(&session.agent)
            .ok_or_else(|| SupervisorError::NoAdapter(session.agent.clone()))?;

        if let Some(old_name) = &session.tmux_session {
            let _ = self.tmux.kill_session(old_name).await;
        }

        let suffix = {
            let mut state = self.state.write().await;
            state.counter += 1;
            state.counter
        };
        let tmux_name = format!("cab-{}-r{}", &id.to_string()[..8], suffix);
        let command = adapter.build_command(&BTreeMap::new())?;

        self.tmux
            .create_session(
                &tmux_name,
                &CreateSessionOptions {
                    cwd: Some(session.cwd.clone()),
                    command: Some(command),
                    width: None,
                    height: None,
                },
            )
            .await?;

        let (updated, old_status) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let session = state
                .sessions
                .get_mut(id)
                .ok_or(SupervisorError::NotFound)?;
            let old_status = session.status;
            if let Some(agent_session_id) = session.agent_session_id.take() {
                state.by_agent_id.remove(&agent_session_id);
            }
            session.tmux_session = Some(tmux_name);
            session.status = SessionStatus::Working;
            session.current_tool = None;
            session.terminal = None;
            session.last_activity = now_ms();
            let updated = session.clone();
            state.dirty = true;
            (updated, old_status)
        };

        self.emit(SessionSignal::Status {
            session: updated.clone(),
            old: old_status,
            new: SessionStatus::Working,
        });
        Ok(updated)
    }

    // ── event application ────────────────────────────────────────────

    /// Apply one decoded hook event: link it to a session, drive the status
    /// machine, and broadcast the enriched event.
    pub async fn ingest(&self, processed: ProcessedEvent) {
        let session = self
            .find_or_create(
                &processed.agent_session_id,
                &processed.agent,
                processed.cwd.as_deref(),
                processed.terminal.clone(),
                processed.transcript_path.clone(),
            )
            .await;

        let mut event = processed.event;
        event.session_id = Some(session.id.to_string());

        match transition_for(&event.kind) {
            Some(status) => self.apply_status(&session.id, status).await,
            None => self.touch(&session.id).await,
        }

        match &event.kind {
            EventKind::PreToolUse { tool, .. } => {
                self.apply_tool(&session.id, Some(tool.clone())).await;
            }
            EventKind::PostToolUse { .. } => {
                self.apply_tool(&session.id, None).await;
            }
            _ => {}
        }

        self.emit(SessionSignal::Event(event));
    }

    /// Status application: a no-op transition only bumps `lastActivity`;
    /// a real one clears `currentTool` when leaving `working` and emits
    /// `session:status`.
    pub async fn apply_status(&self, id: &Uuid, new: SessionStatus) {
        let signal = {
            let mut state = self.state.write().await;
            let Some(session) = state.sessions.get_mut(id) else {
                return;
            };
            let old = session.status;
            session.last_activity = now_ms();
            if old == new {
                None
            } else {
                session.status = new;
                if new != SessionStatus::Working {
                    session.current_tool = None;
                }
                let session = session.clone();
                state.dirty = true;
                Some(SessionSignal::Status {
                    session,
                    old,
                    new,
                })
            }
        };
        if let Some(signal) = signal {
            self.emit(signal);
        }
    }

    /// Record or clear the currently-executing tool. A tool is only ever
    /// recorded on a working session.
    pub async fn apply_tool(&self, id: &Uuid, tool: Option<String>) {
        let signal = {
            let mut state = self.state.write().await;
            let Some(session) = state.sessions.get_mut(id) else {
                return;
            };
            let next = match tool {
                Some(tool) if session.status == SessionStatus::Working => Some(tool),
                Some(_) => None,
                None => None,
            };
            if session.current_tool == next {
                None
            } else {
                session.current_tool = next;
                let session = session.clone();
                state.dirty = true;
                Some(SessionSignal::Updated(session))
            }
        };
        if let Some(signal) = signal {
            self.emit(signal);
        }
    }

    pub(crate) async fn touch(&self, id: &Uuid) {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(id) {
            session.last_activity = now_ms();
            state.dirty = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::events::TerminalInfo;

    pub(crate) fn test_supervisor(config: SupervisorConfig) -> Arc<SessionSupervisor> {
        SessionSupervisor::new(
            Arc::new(TmuxDriver::new()),
            Arc::new(AdapterRegistry::with_defaults()),
            config,
        )
    }

    pub(crate) fn make_session(kind: SessionKind, agent: &str, cwd: &str) -> Session {
        let now = now_ms();
        Session {
            id: Uuid::new_v4(),
            name: basename(cwd).unwrap_or_else(|| "session".to_string()),
            kind,
            agent: agent.to_string(),
            status: SessionStatus::Working,
            cwd: cwd.to_string(),
            created_at: now,
            last_activity: now,
            tmux_session: match kind {
                SessionKind::Internal => Some(format!("cab-{}", &Uuid::new_v4().to_string()[..8])),
                SessionKind::External => None,
            },
            agent_session_id: None,
            current_tool: None,
            terminal: None,
            transcript_path: None,
        }
    }

    pub(crate) fn make_terminal(pane: &str) -> TerminalInfo {
        TerminalInfo {
            pane_id: Some(pane.to_string()),
            socket: Some("/tmp/tmux-1000/default".to_string()),
            tty: None,
        }
    }

    pub(crate) async fn insert(sup: &SessionSupervisor, session: Session) {
        let mut state = sup.state.write().await;
        if let Some(agent_session_id) = &session.agent_session_id {
            state.by_agent_id.insert(agent_session_id.clone(), session.id);
        }
        state.sessions.insert(session.id, session);
    }
}
