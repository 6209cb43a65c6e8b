//! Safe asynchronous wrapper around tmux subcommands.
//!
//! Every invocation passes arguments as an argv array via
//! `tokio::process::Command` — nothing is routed through a shell. The one
//! place where user-supplied text reaches a shell-like surface is the
//! `command` of `create_session`, and that string is *typed* into the new
//! session with `send-keys`, never exec'd by this process.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;

use crate::error::TmuxError;

/// Settle time between creating a detached session and typing its command.
const SHELL_INIT_DELAY: Duration = Duration::from_millis(100);

/// Settle time between pasting a buffer and sending Enter. Long prompts race
/// against the receiving terminal with anything shorter.
const PASTE_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    pub cwd: Option<String>,
    pub command: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SendKeys {
    pub target: String,
    pub keys: Vec<String>,
    pub is_pane_id: bool,
    pub socket: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PasteBuffer {
    pub target: String,
    pub text: String,
    pub is_pane_id: bool,
    pub socket: Option<String>,
    pub send_enter: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TmuxSessionInfo {
    pub name: String,
    pub windows: u32,
    pub created_at: i64,
    pub attached: bool,
}

/// Reject session names that are empty or contain anything outside
/// `[A-Za-z0-9_-]`.
pub fn validate_session_name(name: &str) -> Result<(), TmuxError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TmuxError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Reject paths that are empty or contain shell metacharacters.
pub fn validate_path(path: &str) -> Result<(), TmuxError> {
    const FORBIDDEN: &[char] = &[
        ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '\'', '"', '!',
        '#', '*', '?', '\n', '\r',
    ];
    if path.is_empty() || path.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(TmuxError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Reject pane ids that are not `%<digits>`.
pub fn validate_pane_id(pane: &str) -> Result<(), TmuxError> {
    let digits = match pane.strip_prefix('%') {
        Some(d) => d,
        None => return Err(TmuxError::InvalidPaneId(pane.to_string())),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(TmuxError::InvalidPaneId(pane.to_string()));
    }
    Ok(())
}

fn validate_target(target: &str, is_pane_id: bool) -> Result<(), TmuxError> {
    if is_pane_id {
        validate_pane_id(target)
    } else {
        validate_session_name(target)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TmuxDriver;

impl TmuxDriver {
    pub fn new() -> Self {
        Self
    }

    /// Run one tmux subcommand. An optional socket path is passed with the
    /// global `-S` flag before the subcommand.
    async fn run(&self, socket: Option<&str>, args: &[&str]) -> Result<Output, TmuxError> {
        let mut cmd = Command::new("tmux");
        if let Some(socket) = socket {
            cmd.arg("-S").arg(socket);
        }
        cmd.args(args);
        match cmd.output().await {
            Ok(output) => Ok(output),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TmuxError::NotAvailable),
            Err(e) => Err(e.into()),
        }
    }

    fn check(output: Output, target: &str) -> Result<Output, TmuxError> {
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.contains("duplicate session") {
            return Err(TmuxError::AlreadyExists(target.to_string()));
        }
        if stderr.contains("can't find") || stderr.contains("no server") {
            return Err(TmuxError::NotFound(target.to_string()));
        }
        Err(TmuxError::SubprocessFailed {
            exit_code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }

    pub async fn is_available(&self) -> bool {
        self.run(None, &["-V"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub async fn version(&self) -> Option<String> {
        let output = self.run(None, &["-V"]).await.ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Create a detached session. When a `command` is supplied it is typed
    /// into the fresh shell in a second step so the session outlives the
    /// command's own exit.
    pub async fn create_session(
        &self,
        name: &str,
        opts: &CreateSessionOptions,
    ) -> Result<(), TmuxError> {
        validate_session_name(name)?;
        if let Some(cwd) = &opts.cwd {
            validate_path(cwd)?;
        }

        let width = opts.width.map(|w| w.to_string());
        let height = opts.height.map(|h| h.to_string());

        let mut args: Vec<&str> = vec!["new-session", "-d", "-s", name];
        if let Some(cwd) = &opts.cwd {
            args.push("-c");
            args.push(cwd);
        }
        if let Some(w) = &width {
            args.push("-x");
            args.push(w);
        }
        if let Some(h) = &height {
            args.push("-y");
            args.push(h);
        }

        let output = self.run(None, &args).await?;
        Self::check(output, name)?;

        if let Some(command) = &opts.command {
            // Give the shell a moment to initialize before typing into it.
            tokio::time::sleep(SHELL_INIT_DELAY).await;
            let output = self
                .run(None, &["send-keys", "-t", name, command])
                .await?;
            Self::check(output, name)?;
            let output = self.run(None, &["send-keys", "-t", name, "Enter"]).await?;
            Self::check(output, name)?;
        }

        Ok(())
    }

    /// Kill a session. Returns `false` when the session did not exist;
    /// other failures are logged and swallowed the same way.
    pub async fn kill_session(&self, name: &str) -> Result<bool, TmuxError> {
        validate_session_name(name)?;
        let output = self.run(None, &["kill-session", "-t", name]).await?;
        match Self::check(output, name) {
            Ok(_) => Ok(true),
            Err(TmuxError::NotFound(_)) => Ok(false),
            Err(e) => {
                tracing::warn!(session = name, error = %e, "kill-session failed");
                Ok(false)
            }
        }
    }

    pub async fn session_exists(&self, name: &str) -> Result<bool, TmuxError> {
        validate_session_name(name)?;
        let output = self.run(None, &["has-session", "-t", name]).await?;
        Ok(output.status.success())
    }

    pub async fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, TmuxError> {
        let output = self
            .run(
                None,
                &[
                    "list-sessions",
                    "-F",
                    "#{session_name}\t#{session_windows}\t#{session_created}\t#{session_attached}",
                ],
            )
            .await?;
        if !output.status.success() {
            // No server running means no sessions.
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_session_line).collect())
    }

    pub async fn send_keys(&self, req: &SendKeys) -> Result<(), TmuxError> {
        validate_target(&req.target, req.is_pane_id)?;
        let mut args: Vec<&str> = vec!["send-keys", "-t", &req.target];
        for key in &req.keys {
            args.push(key);
        }
        let output = self.run(req.socket.as_deref(), &args).await?;
        Self::check(output, &req.target)?;
        Ok(())
    }

    /// Paste multi-line text through tmux's buffer. The text is written to a
    /// file in a fresh temporary directory, loaded with `load-buffer`, and
    /// pasted into the target. The file is removed with `remove_file` and
    /// the directory with a directory-removal on every exit path.
    pub async fn paste_buffer(&self, req: &PasteBuffer) -> Result<(), TmuxError> {
        validate_target(&req.target, req.is_pane_id)?;

        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("paste.txt");
        let result = self.paste_from_file(req, &file_path).await;

        // Explicit cleanup; the TempDir drop covers the error paths where
        // these operations themselves fail.
        let _ = tokio::fs::remove_file(&file_path).await;
        let _ = dir.close();

        result
    }

    async fn paste_from_file(&self, req: &PasteBuffer, file_path: &Path) -> Result<(), TmuxError> {
        tokio::fs::write(file_path, &req.text).await?;
        let file = file_path.to_string_lossy();

        let output = self
            .run(req.socket.as_deref(), &["load-buffer", &file])
            .await?;
        Self::check(output, &req.target)?;

        let output = self
            .run(req.socket.as_deref(), &["paste-buffer", "-t", &req.target])
            .await?;
        Self::check(output, &req.target)?;

        if req.send_enter {
            tokio::time::sleep(PASTE_SETTLE_DELAY).await;
            let output = self
                .run(
                    req.socket.as_deref(),
                    &["send-keys", "-t", &req.target, "Enter"],
                )
                .await?;
            Self::check(output, &req.target)?;
        }
        Ok(())
    }

    pub async fn send_interrupt(&self, target: &str) -> Result<(), TmuxError> {
        validate_session_name(target)?;
        let output = self.run(None, &["send-keys", "-t", target, "C-c"]).await?;
        Self::check(output, target)?;
        Ok(())
    }

    /// Capture visible pane scrollback from `start_line` (default -100) to
    /// `end_line` (default: the current line).
    pub async fn capture_pane(
        &self,
        target: &str,
        opts: &CaptureOptions,
    ) -> Result<String, TmuxError> {
        validate_session_name(target)?;
        let start = opts.start_line.unwrap_or(-100).to_string();
        let end = opts.end_line.map(|e| e.to_string());

        let mut args: Vec<&str> = vec!["capture-pane", "-t", target, "-p", "-S", &start];
        if let Some(end) = &end {
            args.push("-E");
            args.push(end);
        }
        let output = self.run(None, &args).await?;
        let output = Self::check(output, target)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_session_line(line: &str) -> Option<TmuxSessionInfo> {
    let mut parts = line.split('\t');
    let name = parts.next()?.to_string();
    let windows = parts.next()?.parse().ok()?;
    let created_at = parts.next()?.parse().ok()?;
    let attached = parts.next()? != "0";
    Some(TmuxSessionInfo {
        name,
        windows,
        created_at,
        attached,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
