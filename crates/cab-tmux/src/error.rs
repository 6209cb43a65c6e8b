use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux is not available on this system")]
    NotAvailable,

    #[error("tmux session already exists: {0}")]
    AlreadyExists(String),

    #[error("tmux target not found: {0}")]
    NotFound(String),

    #[error("tmux exited with status {exit_code}: {stderr}")]
    SubprocessFailed { exit_code: i32, stderr: String },

    #[error("invalid tmux session name: {0:?}")]
    InvalidName(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("invalid tmux pane id: {0:?}")]
    InvalidPaneId(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offending_input() {
        let err = TmuxError::InvalidName("bad name".to_string());
        assert!(err.to_string().contains("bad name"));

        let err = TmuxError::InvalidPaneId("%x".to_string());
        assert!(err.to_string().contains("%x"));
    }

    #[test]
    fn subprocess_failed_carries_exit_code_and_stderr() {
        let err = TmuxError::SubprocessFailed {
            exit_code: 1,
            stderr: "no server running".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains("no server running"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TmuxError = io.into();
        assert!(matches!(err, TmuxError::Io(_)));
    }
}
