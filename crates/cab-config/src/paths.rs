use std::path::{Path, PathBuf};

/// Holds a configurable base directory for all bridge file paths.
///
/// The on-disk layout under the base is stable:
/// `data/events.jsonl`, `data/sessions.json`, `hooks/coding-agent-hook.sh`.
///
/// Use `DataPaths::new()` for production (resolves `~/.cab`),
/// or `DataPaths::with_base()` for testing with an isolated directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    base: PathBuf,
}

impl DataPaths {
    /// Create paths rooted at `~/.cab`. Returns an error if the home
    /// directory cannot be determined.
    pub fn new() -> anyhow::Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(Self {
            base: home.join(".cab"),
        })
    }

    /// Create paths rooted at a custom base directory (`--data-dir`, tests).
    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn config_path(&self) -> PathBuf {
        self.base.join("config.toml")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir().join("events.jsonl")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir().join("sessions.json")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.base.join("hooks")
    }

    pub fn hook_script_path(&self) -> PathBuf {
        self.hooks_dir().join("coding-agent-hook.sh")
    }

    /// Ensure the base, data, and hooks directories exist.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.hooks_dir())?;
        Ok(())
    }
}
