mod doctor;
mod setup;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use cab_agent::{AdapterRegistry, HookDecoder, SessionSupervisor, SupervisorConfig};
use cab_api::{build_router, AppState};
use cab_config::{BridgeConfig, DataPaths};
use cab_tail::{LineTailer, TailEvent, TailerOptions};
use cab_tmux::TmuxDriver;

#[derive(Parser)]
#[command(name = "cabd", version, about = "Coding-agent bridge daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server in the foreground
    Server {
        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind to
        #[arg(long)]
        host: Option<IpAddr>,
        /// Base directory for state, events, and hooks
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Default agent for new sessions
        #[arg(long)]
        agent: Option<String>,
        /// Verbose logging
        #[arg(long)]
        debug: bool,
    },
    /// Write the hook script and register it with installed agents
    Setup {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Only set up this agent
        #[arg(long)]
        agent: Option<String>,
    },
    /// Remove bridge hooks from agent settings
    Uninstall {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Only remove hooks for this agent
        #[arg(long)]
        agent: Option<String>,
    },
    /// Check dependencies, data directory, and server health
    Doctor {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

fn data_paths(data_dir: Option<PathBuf>) -> anyhow::Result<DataPaths> {
    match data_dir {
        Some(base) => Ok(DataPaths::with_base(base)),
        None => DataPaths::new(),
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "cabd=debug,cab_api=debug,cab_agent=debug,cab_tail=debug,cab_tmux=debug,tower_http=debug"
    } else {
        "cabd=info,cab_api=info,cab_agent=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn supervisor_config(config: &BridgeConfig, paths: &DataPaths) -> SupervisorConfig {
    SupervisorConfig {
        sessions_path: paths.sessions_path(),
        default_agent: config.default_agent.clone(),
        track_external: config.track_external,
        linking_window_ms: config.linking_window_ms,
        working_timeout_ms: config.working_timeout_ms,
        offline_cleanup_ms: config.offline_cleanup_ms,
        stale_cleanup_ms: config.stale_cleanup_ms,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            host,
            data_dir,
            agent,
            debug,
        } => {
            init_tracing(debug);

            let paths = data_paths(data_dir)?;
            paths.ensure_dirs()?;
            let mut config = BridgeConfig::load_from(&paths)?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(agent) = agent {
                config.default_agent = agent;
            }
            config.validate()?;

            // The hook script bakes in the server address; refresh it so a
            // changed port does not strand hooks on the old one.
            setup::write_hook_script(&config, &paths)?;

            let tmux = Arc::new(TmuxDriver::new());
            if !tmux.is_available().await {
                tracing::warn!("tmux not found on PATH; internal sessions cannot be created");
            }

            let registry = Arc::new(AdapterRegistry::with_defaults());
            let decoder = Arc::new(HookDecoder::new(registry.clone()));
            let supervisor =
                SessionSupervisor::new(tmux, registry, supervisor_config(&config, &paths));

            supervisor.load().await?;
            supervisor.start().await;

            // Pump the events file into the decoder. The file is the source
            // of truth; POST /event is only a lower-latency duplicate path.
            let (tailer, mut tail_rx) =
                LineTailer::spawn(paths.events_path(), TailerOptions::default());
            let pump_supervisor = supervisor.clone();
            let pump_decoder = decoder.clone();
            let pump = tokio::spawn(async move {
                while let Some(event) = tail_rx.recv().await {
                    match event {
                        TailEvent::Line(line) => {
                            if let Some(processed) = pump_decoder.decode_line(&line) {
                                pump_supervisor.ingest(processed).await;
                            }
                        }
                        TailEvent::Error(e) => {
                            tracing::debug!(error = %e, "events tailer error");
                        }
                        TailEvent::Ready => {
                            tracing::debug!("events tailer ready");
                        }
                        TailEvent::Closed => break,
                    }
                }
            });

            let state = AppState::new(config.clone(), supervisor.clone(), decoder);
            let app = build_router(state);

            let addr: SocketAddr = config.bind_addr().parse()?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("Listening on {}", addr);

            let shutdown = async {
                #[cfg(unix)]
                {
                    let mut terminate =
                        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                            .expect("Failed to install SIGTERM handler");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c()
                        .await
                        .expect("Failed to listen for ctrl+c");
                }
                tracing::info!("Shutting down...");
            };

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;

            tailer.stop();
            pump.abort();
            supervisor.stop().await;
            Ok(())
        }

        Commands::Setup { data_dir, agent } => {
            init_tracing(false);
            let paths = data_paths(data_dir)?;
            let config = BridgeConfig::load_from(&paths)?;
            let registry = AdapterRegistry::with_defaults();
            setup::install(&config, &paths, &registry, agent.as_deref())
        }

        Commands::Uninstall { data_dir, agent } => {
            init_tracing(false);
            let paths = data_paths(data_dir)?;
            let registry = AdapterRegistry::with_defaults();
            setup::uninstall(&paths, &registry, agent.as_deref())
        }

        Commands::Doctor { data_dir } => {
            init_tracing(false);
            let paths = data_paths(data_dir)?;
            doctor::run(&paths).await
        }
    }
}
