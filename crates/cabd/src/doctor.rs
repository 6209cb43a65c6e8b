//! Environment and server diagnostics.

use std::time::Duration;

use cab_agent::AdapterRegistry;
use cab_config::{BridgeConfig, DataPaths};
use cab_tmux::TmuxDriver;

pub async fn run(paths: &DataPaths) -> anyhow::Result<()> {
    let tmux = TmuxDriver::new();
    match tmux.version().await {
        Some(version) => println!("tmux:       {}", version),
        None => println!("tmux:       NOT FOUND (required for internal sessions)"),
    }

    let registry = AdapterRegistry::with_defaults();
    for adapter in registry.iter() {
        let status = if adapter.is_available() {
            "available"
        } else {
            "not found"
        };
        println!("{:<11} {}", format!("{}:", adapter.display_name()), status);
    }

    match paths.ensure_dirs() {
        Ok(()) => println!("data dir:   {} (writable)", paths.base_dir().display()),
        Err(e) => println!("data dir:   {} ({})", paths.base_dir().display(), e),
    }

    let script = paths.hook_script_path();
    if script.exists() {
        println!("hook:       {}", script.display());
    } else {
        println!("hook:       not installed (run `cabd setup`)");
    }

    let config = BridgeConfig::load_from(paths)?;
    let url = format!("http://{}/health", config.bind_addr());
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            println!(
                "server:     running ({} sessions, {} clients)",
                body["sessions"].as_u64().unwrap_or(0),
                body["clients"].as_u64().unwrap_or(0),
            );
        }
        Ok(resp) => println!("server:     unhealthy ({})", resp.status()),
        Err(_) => println!("server:     not running at {}", config.bind_addr()),
    }

    Ok(())
}
