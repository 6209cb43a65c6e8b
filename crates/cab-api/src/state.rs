use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::Mutex;

use cab_agent::{AgentEvent, HookDecoder, SessionSignal, SessionSupervisor};
use cab_config::BridgeConfig;

/// Bounded in-memory ring of recent events, serving `get_history`. Nothing
/// here is persisted.
pub const EVENT_HISTORY_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub supervisor: Arc<SessionSupervisor>,
    pub decoder: Arc<HookDecoder>,
    pub ws_clients: Arc<AtomicUsize>,
    pub history: Arc<Mutex<VecDeque<AgentEvent>>>,
    pub version: &'static str,
}

impl AppState {
    /// Build the state and start the history recorder, which mirrors every
    /// broadcast event into the ring.
    pub fn new(
        config: BridgeConfig,
        supervisor: Arc<SessionSupervisor>,
        decoder: Arc<HookDecoder>,
    ) -> Self {
        let state = Self {
            config,
            supervisor,
            decoder,
            ws_clients: Arc::new(AtomicUsize::new(0)),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(EVENT_HISTORY_LIMIT))),
            version: env!("CARGO_PKG_VERSION"),
        };

        let history = state.history.clone();
        let mut signals = state.supervisor.subscribe();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(SessionSignal::Event(event)) => {
                        let mut history = history.lock().await;
                        if history.len() == EVENT_HISTORY_LIMIT {
                            history.pop_front();
                        }
                        history.push_back(event);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("history recorder lagged by {} signals", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        state
    }

    /// Most recent events, newest last, optionally filtered by bridge
    /// session id and capped at `limit`.
    pub async fn history_snapshot(
        &self,
        limit: Option<usize>,
        session_id: Option<&str>,
    ) -> Vec<AgentEvent> {
        let history = self.history.lock().await;
        let filtered: Vec<AgentEvent> = history
            .iter()
            .filter(|e| session_id.map_or(true, |id| e.session_id.as_deref() == Some(id)))
            .cloned()
            .collect();
        let limit = limit.unwrap_or(filtered.len());
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }
}
