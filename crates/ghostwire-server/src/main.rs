use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ghostwire_config::ServerConfig;
use ghostwire_core::{run_server_session, ServerSessionConfig};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// GhostWire tunnel server.
#[derive(Parser, Debug)]
#[command(name = "ghostwire-server", about = "Accepts GhostWire carriers and dials remote endpoints on their behalf")]
struct Cli {
    /// Path to the server's TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print a freshly generated authentication token and exit, without
    /// reading a configuration file.
    #[arg(long)]
    generate_token: bool,
}

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
    let config = ServerConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_tracing(&config.logging.level);

    let bind_addr = format!("{}:{}", config.server.listen_host, config.server.listen_port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(%bind_addr, path = %config.server.websocket_path, "ghostwire-server listening");

    let carrier_url = config.carrier_url();
    loop {
        let (tcp_stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        let path = config.server.websocket_path.clone();
        let token = config.auth.token.clone();
        let url = carrier_url.clone();

        tokio::spawn(async move {
            let carrier = match ghostwire_transport_ws::accept_server(tcp_stream, &path).await {
                Ok(carrier) => carrier,
                Err(e) => {
                    warn!(%peer, "websocket handshake failed: {e}");
                    return;
                }
            };

            info!(%peer, "carrier accepted");
            let session_config = ServerSessionConfig::new(token, url);
            if let Err(e) = run_server_session(carrier, session_config).await {
                error!(%peer, "session ended: {e}");
            } else {
                info!(%peer, "session ended cleanly");
            }
        });
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
