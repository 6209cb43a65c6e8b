//! Tail an append-only text file, emitting complete newline-terminated
//! records.
//!
//! Two wake sources feed a single read routine: filesystem change
//! notifications from `notify` and a periodic poll. The owning task
//! serializes reads, so a notification landing mid-read cannot re-enter.
//! Truncation, rotation, and delayed creation are all tolerated: the
//! tailer resets its offset and keeps polling for the file to reappear.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Maximum bytes consumed in a single read pass. Bounds memory when a file
/// grows enormously between wakes.
const MAX_READ_BYTES: u64 = 64 * 1024 * 1024;

/// Delay before re-subscribing after the watch subscription errors.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum TailEvent {
    /// The tailer task is running and has recorded its starting offset.
    Ready,
    /// One complete, trimmed, non-empty line.
    Line(String),
    /// A recoverable error (watch failure, unreadable file).
    Error(String),
    /// The tailer was stopped.
    Closed,
}

#[derive(Debug, Clone)]
pub struct TailerOptions {
    /// Start reading from offset 0 instead of the current end of file.
    pub from_start: bool,
    /// Poll interval backing up the filesystem notifications.
    pub poll_interval: Duration,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self {
            from_start: false,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Incremental read state: how far we have read and any trailing partial
/// line carried over to the next pass.
struct TailState {
    position: u64,
    carry: String,
}

impl TailState {
    fn new() -> Self {
        Self {
            position: 0,
            carry: String::new(),
        }
    }
}

/// Read every complete line appended since the last pass. A missing file
/// resets the offset and returns no lines; a shrunken file is treated as
/// truncation/rotation and re-read from the start.
fn read_pending(path: &Path, state: &mut TailState) -> std::io::Result<Vec<String>> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            state.position = 0;
            state.carry.clear();
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    if len < state.position {
        state.position = 0;
        state.carry.clear();
    }
    if len == state.position {
        return Ok(Vec::new());
    }

    file.seek(SeekFrom::Start(state.position))?;
    let budget = (len - state.position).min(MAX_READ_BYTES);
    let mut buf = String::new();
    let read = file.take(budget).read_to_string(&mut buf)?;
    state.position += read as u64;

    let text = if state.carry.is_empty() {
        buf
    } else {
        let mut combined = std::mem::take(&mut state.carry);
        combined.push_str(&buf);
        combined
    };

    let ends_with_newline = text.ends_with('\n');
    let mut pieces: Vec<&str> = text.split('\n').collect();
    if !ends_with_newline {
        if let Some(last) = pieces.pop() {
            state.carry = last.to_string();
        }
    }

    Ok(pieces
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Subscribe to change notifications for the tailed file's parent directory.
/// Watching the directory rather than the file lets the subscription survive
/// the file not existing yet.
fn subscribe(
    path: &Path,
) -> notify::Result<(notify::RecommendedWatcher, mpsc::Receiver<notify::Result<()>>)> {
    let (tx, rx) = mpsc::channel(64);
    let file_name = path.file_name().map(|n| n.to_os_string());

    let mut watcher = notify::RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let forwarded = match result {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) && event.paths.iter().any(|p| {
                        file_name.is_none() || p.file_name().map(|n| n.to_os_string()) == file_name
                    });
                    if !relevant {
                        return;
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            };
            let _ = tx.blocking_send(forwarded);
        },
        notify::Config::default(),
    )?;

    let watch_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

pub struct LineTailer {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LineTailer {
    /// Start tailing `path`. Events arrive on the returned receiver,
    /// beginning with `Ready` once the starting offset is recorded.
    pub fn spawn(path: PathBuf, opts: TailerOptions) -> (Self, mpsc::Receiver<TailEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(path, opts, tx, shutdown_rx));
        (
            Self {
                shutdown: Some(shutdown_tx),
                task,
            },
            rx,
        )
    }

    /// Signal the tailer to emit `Closed` and exit.
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    /// Abort without the `Closed` handshake. Used on teardown paths where
    /// nobody is reading the channel anymore.
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn run(
    path: PathBuf,
    opts: TailerOptions,
    tx: mpsc::Sender<TailEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut state = TailState::new();
    if !opts.from_start {
        if let Ok(meta) = std::fs::metadata(&path) {
            state.position = meta.len();
        }
    }

    let mut watch = match subscribe(&path) {
        Ok((watcher, rx)) => Some((watcher, rx)),
        Err(e) => {
            let _ = tx.send(TailEvent::Error(e.to_string())).await;
            None
        }
    };

    if tx.send(TailEvent::Ready).await.is_err() {
        return;
    }

    let mut poll = tokio::time::interval(opts.poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let notified = async {
            match &mut watch {
                Some((_, rx)) => rx.recv().await,
                // No subscription; sleep until the poll re-establishes one.
                None => {
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    None
                }
            }
        };

        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = tx.send(TailEvent::Closed).await;
                return;
            }
            _ = poll.tick() => {
                if watch.is_none() {
                    watch = subscribe(&path).ok();
                }
                if !drain(&path, &mut state, &tx).await {
                    return;
                }
            }
            event = notified => {
                match event {
                    Some(Ok(())) => {
                        if !drain(&path, &mut state, &tx).await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        // Subscription errored; drop it and re-subscribe on
                        // a later poll tick. Polling keeps records flowing
                        // in the meantime.
                        watch = None;
                        let _ = tx.send(TailEvent::Error(e.to_string())).await;
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    }
                    None => {
                        // Either the watcher callback sender dropped or no
                        // subscription exists; the next poll tick will
                        // re-subscribe.
                        watch = None;
                    }
                }
            }
        }
    }
}

/// Read and forward pending lines. Returns `false` when the receiver is gone.
async fn drain(path: &Path, state: &mut TailState, tx: &mpsc::Sender<TailEvent>) -> bool {
    match read_pending(path, state) {
        Ok(lines) => {
            for line in lines {
                if tx.send(TailEvent::Line(line)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => tx.send(TailEvent::Error(e.to_string())).await.is_ok(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
