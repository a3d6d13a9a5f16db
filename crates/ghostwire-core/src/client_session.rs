use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ghostwire_proto::{derive_key, MessageType, SessionKey};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::carrier::{CarrierChannel, CarrierError};
use crate::close_payload::{encode_close, CLOSE_REASON_IO_ERROR};
use crate::connect_payload::encode_connect;
use crate::supervisor::ShutdownSignal;
use crate::tunnel::{Tunnel, TunnelTable};
use crate::wire::{send_frame, WireError};

/// One local-listener-to-remote-target rule. Produced by the configuration
/// layer from a parsed port-mapping string and handed to the client
/// session, which owns only the bind/remote addressing, not the parsing.
#[derive(Debug, Clone)]
pub struct PortMapping {
    pub bind_host: String,
    pub bind_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// Configuration for one client-side carrier session.
#[derive(Debug, Clone)]
pub struct ClientSessionConfig {
    pub token: String,
    pub url: String,
    pub port_mappings: Vec<PortMapping>,
    /// Idle period before a PING is sent. Defaults to 30s.
    pub heartbeat_idle: Duration,
    /// Interval between heartbeat checks. Defaults to 15s.
    pub heartbeat_check_interval: Duration,
    /// How long to wait for a PONG before declaring the carrier dead.
    /// Defaults to 15s.
    pub pong_timeout: Duration,
}

impl ClientSessionConfig {
    pub fn new(token: String, url: String, port_mappings: Vec<PortMapping>) -> Self {
        Self {
            token,
            url,
            port_mappings,
            heartbeat_idle: Duration::from_secs(30),
            heartbeat_check_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientSessionError {
    #[error("carrier error: {0}")]
    Carrier(#[from] CarrierError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("heartbeat timed out waiting for PONG")]
    HeartbeatTimeout,
}

/// Runs one client-side carrier session to completion: sends AUTH, starts
/// one local TCP listener per configured port mapping, then dispatches
/// inbound frames and heartbeats until the carrier fails. Always closes
/// every tunnel and stops accepting new local connections before
/// returning.
pub async fn run_client_session(
    carrier: Arc<dyn CarrierChannel>,
    config: ClientSessionConfig,
    shutdown: ShutdownSignal,
) -> Result<(), ClientSessionError> {
    let key = derive_key(&config.token, &config.url);

    send_frame(&carrier, &key, MessageType::Auth, 0, config.token.as_bytes())
        .await
        .map_err(wire_err)?;
    info!("AUTH frame sent");

    let tunnels = Arc::new(TunnelTable::new());
    let next_stream_id = Arc::new(AtomicU32::new(1));

    let mut listener_tasks = Vec::new();
    for mapping in &config.port_mappings {
        let listener = TcpListener::bind((mapping.bind_host.as_str(), mapping.bind_port))
            .await
            .map_err(|e| {
                ClientSessionError::Protocol(format!(
                    "failed to bind {}:{}: {e}",
                    mapping.bind_host, mapping.bind_port
                ))
            })?;
        listener_tasks.push(spawn_accept_loop(
            listener,
            mapping.clone(),
            carrier.clone(),
            key,
            tunnels.clone(),
            next_stream_id.clone(),
        ));
    }

    let result = dispatch_loop(&carrier, &key, &config, &tunnels, &shutdown).await;

    for task in listener_tasks {
        task.abort();
    }
    tunnels.close_all().await;
    result
}

fn spawn_accept_loop(
    listener: TcpListener,
    mapping: PortMapping,
    carrier: Arc<dyn CarrierChannel>,
    key: SessionKey,
    tunnels: Arc<TunnelTable>,
    next_stream_id: Arc<AtomicU32>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("local accept failed on {}:{}: {e}", mapping.bind_host, mapping.bind_port);
                    continue;
                }
            };

            let stream_id = next_stream_id.fetch_add(1, Ordering::SeqCst);
            if stream_id == u32::MAX {
                error!("stream id space exhausted, refusing new local connection");
                continue;
            }

            debug!(stream_id, %peer, "accepted local connection");
            let (read_half, write_half) = socket.into_split();
            let tunnel = Arc::new(Tunnel::new(write_half));
            if !tunnels.insert(stream_id, tunnel).await {
                continue; // carrier tearing down
            }

            let payload = encode_connect(&mapping.remote_host, mapping.remote_port);
            if send_frame(&carrier, &key, MessageType::Connect, stream_id, &payload)
                .await
                .is_err()
            {
                tunnels.remove(stream_id).await;
                continue;
            }

            crate::pump::spawn_remote_pump(carrier.clone(), key, tunnels.clone(), stream_id, read_half);
        }
    })
}

async fn dispatch_loop(
    carrier: &Arc<dyn CarrierChannel>,
    key: &SessionKey,
    config: &ClientSessionConfig,
    tunnels: &Arc<TunnelTable>,
    shutdown: &ShutdownSignal,
) -> Result<(), ClientSessionError> {
    let mut last_recv = Instant::now();
    let mut ping_sent_at: Option<Instant> = None;
    let mut interval = tokio::time::interval(config.heartbeat_check_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                return Ok(());
            }
            raw = carrier.recv() => {
                let raw = match raw {
                    Ok(raw) => raw,
                    Err(CarrierError::Closed) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                last_recv = Instant::now();

                let (message_type, stream_id, payload, _) = match ghostwire_proto::unpack_frame(&raw, key) {
                    Ok(decoded) => decoded,
                    Err(_) => return Err(ClientSessionError::Protocol("frame authentication failed".into())),
                };

                match message_type {
                    MessageType::Data => {
                        if let Some(tunnel) = tunnels.get(stream_id).await {
                            if tunnel.write(&payload).await.is_err() {
                                tunnels.remove(stream_id).await;
                                send_frame(
                                    carrier,
                                    key,
                                    MessageType::Close,
                                    stream_id,
                                    &encode_close(CLOSE_REASON_IO_ERROR),
                                )
                                .await
                                .map_err(wire_err)?;
                            }
                        }
                    }
                    MessageType::Close => {
                        tunnels.remove(stream_id).await;
                    }
                    MessageType::Error => {
                        let message = String::from_utf8_lossy(&payload);
                        warn!(stream_id, %message, "server reported stream error");
                        tunnels.remove(stream_id).await;
                    }
                    MessageType::Pong => {
                        ping_sent_at = None;
                    }
                    other => {
                        return Err(ClientSessionError::Protocol(format!(
                            "unexpected message type on client: {other:?}"
                        )));
                    }
                }
            }
            _ = interval.tick() => {
                if let Some(sent_at) = ping_sent_at {
                    if sent_at.elapsed() >= config.pong_timeout {
                        return Err(ClientSessionError::HeartbeatTimeout);
                    }
                } else if last_recv.elapsed() >= config.heartbeat_idle {
                    let now = now_as_millis();
                    send_frame(carrier, key, MessageType::Ping, 0, &now.to_be_bytes())
                        .await
                        .map_err(wire_err)?;
                    ping_sent_at = Some(Instant::now());
                }
            }
        }
    }
}

fn now_as_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn wire_err(e: WireError) -> ClientSessionError {
    match e {
        WireError::Carrier(c) => ClientSessionError::Carrier(c),
        WireError::Codec(c) => ClientSessionError::Protocol(c.to_string()),
    }
}
