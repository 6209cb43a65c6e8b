use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr};

use crate::paths::DataPaths;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    9700
}

fn default_allowed_origins() -> Vec<String> {
    let mut origins = vec![
        "http://localhost:*".to_string(),
        "https://localhost:*".to_string(),
        "http://127.0.0.1:*".to_string(),
        "https://127.0.0.1:*".to_string(),
    ];
    if let Ok(val) = env::var("CAB_ALLOWED_ORIGINS") {
        origins.extend(
            val.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
    }
    origins
}

fn default_agent() -> String {
    "claude".to_string()
}

fn default_track_external() -> bool {
    true
}

fn default_linking_window_ms() -> i64 {
    5 * 60 * 1000
}

fn default_working_timeout_ms() -> i64 {
    120_000
}

fn default_offline_cleanup_ms() -> i64 {
    60 * 60 * 1000
}

fn default_stale_cleanup_ms() -> i64 {
    24 * 60 * 60 * 1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Whether hook traffic from sessions the bridge did not spawn creates
    /// tracked external sessions.
    #[serde(default = "default_track_external")]
    pub track_external: bool,
    #[serde(default = "default_linking_window_ms")]
    pub linking_window_ms: i64,
    #[serde(default = "default_working_timeout_ms")]
    pub working_timeout_ms: i64,
    #[serde(default = "default_offline_cleanup_ms")]
    pub offline_cleanup_ms: i64,
    #[serde(default = "default_stale_cleanup_ms")]
    pub stale_cleanup_ms: i64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            default_agent: default_agent(),
            track_external: default_track_external(),
            linking_window_ms: default_linking_window_ms(),
            working_timeout_ms: default_working_timeout_ms(),
            offline_cleanup_ms: default_offline_cleanup_ms(),
            stale_cleanup_ms: default_stale_cleanup_ms(),
        }
    }
}

impl BridgeConfig {
    /// Load config from `{base}/config.toml`, falling back to defaults when
    /// the file does not exist.
    pub fn load_from(paths: &DataPaths) -> anyhow::Result<Self> {
        let config_file = paths.config_path();
        let config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate config values. Called automatically by `load_from`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must not be 0");
        }
        if self.default_agent.is_empty() {
            anyhow::bail!("default_agent must not be empty");
        }
        if self.linking_window_ms <= 0 {
            anyhow::bail!("linking_window_ms must be greater than 0");
        }
        if self.working_timeout_ms <= 0 {
            anyhow::bail!("working_timeout_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
