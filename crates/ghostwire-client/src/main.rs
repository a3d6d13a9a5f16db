use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use ghostwire_config::ClientConfig;
use ghostwire_core::{run_client_session, ClientSessionConfig, Supervisor, SupervisorState};
use tracing::{info, warn};

/// GhostWire tunnel client.
#[derive(Parser, Debug)]
#[command(name = "ghostwire-client", about = "Listens on local ports and forwards connections through a GhostWire carrier")]
struct Cli {
    /// Path to the client's TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print a freshly generated authentication token and exit, without
    /// reading a configuration file.
    #[arg(long)]
    generate_token: bool,
}

/// A carrier is credited with having reached `Up` if it stays connected
/// longer than this: the protocol gives the client no explicit
/// authentication acknowledgement, so an immediate teardown (the server
/// dropping the carrier right after a rejected AUTH frame) is the only
/// observable signal that authentication failed.
const REACHED_UP_THRESHOLD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.generate_token {
        println!("{}", ghostwire_proto::generate_token());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .context("--config is required unless --generate-token is given")?;
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_tracing(&config.logging.level);

    let port_mappings = config.port_mappings().context("parsing tunnels.ports")?;
    for mapping in &port_mappings {
        info!(
            "mapping {}:{} -> {}:{}",
            mapping.bind_host, mapping.bind_port, mapping.remote_host, mapping.remote_port
        );
    }

    let supervisor = Supervisor::new(config.reconnect_config());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let run_loop = supervisor.run(
        |state| match state {
            SupervisorState::Connecting => info!("connecting"),
            SupervisorState::Down => warn!("carrier down"),
            SupervisorState::Stopping => info!("stopping"),
        },
        |shutdown| {
            let url = config.server.url.clone();
            let token = config.auth.token.clone();
            let port_mappings = port_mappings.clone();
            async move {
                let carrier = ghostwire_transport_ws::connect_client(&url)
                    .await
                    .map_err(|e| e.to_string())?;
                let session_config = ClientSessionConfig::new(token, url, port_mappings);

                let started = Instant::now();
                let result = run_client_session(carrier, session_config, shutdown).await;
                let reached_up = started.elapsed() >= REACHED_UP_THRESHOLD;

                match result {
                    Ok(()) => Ok(reached_up),
                    Err(e) => {
                        if reached_up {
                            Ok(true)
                        } else {
                            Err(e.to_string())
                        }
                    }
                }
            }
        },
    );
    tokio::pin!(run_loop);

    tokio::select! {
        _ = &mut run_loop => {}
        _ = &mut shutdown => {
            info!("shutdown requested");
            supervisor.shutdown();
            run_loop.await;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
