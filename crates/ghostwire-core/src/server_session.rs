use std::sync::Arc;
use std::time::Duration;

use ghostwire_proto::{derive_key, tokens_equal, MessageType, SessionKey};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::carrier::{CarrierChannel, CarrierError};
use crate::close_payload::{encode_close, CLOSE_REASON_IO_ERROR};
use crate::connect_payload::decode_connect;
use crate::tunnel::{StreamId, Tunnel, TunnelTable};
use crate::wire::{send_frame, WireError};

/// Configuration for one server-side carrier session.
#[derive(Debug, Clone)]
pub struct ServerSessionConfig {
    /// Shared secret the client must present in its AUTH frame.
    pub token: String,
    /// Canonical carrier URL used for key derivation; must match the
    /// client's configured URL exactly.
    pub url: String,
    /// Timeout for dialing a CONNECT target. Defaults to 10 seconds.
    pub dial_timeout: Duration,
}

impl ServerSessionConfig {
    pub fn new(token: String, url: String) -> Self {
        Self {
            token,
            url,
            dial_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerSessionError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("carrier error: {0}")]
    Carrier(#[from] CarrierError),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Runs one server-side carrier session to completion: authenticates the
/// peer, then dispatches CONNECT/DATA/CLOSE/PING frames until the carrier
/// closes or a protocol violation occurs. Always closes every tunnel before
/// returning, regardless of the outcome.
pub async fn run_server_session(
    carrier: Arc<dyn CarrierChannel>,
    config: ServerSessionConfig,
) -> Result<(), ServerSessionError> {
    let key = authenticate(&carrier, &config).await?;
    let tunnels = Arc::new(TunnelTable::new());

    let result = dispatch_loop(&carrier, &key, &config, &tunnels).await;
    tunnels.close_all().await;
    result
}

/// Authenticating state: reads exactly one frame, requires it to be AUTH,
/// and verifies the token in constant time before deriving the session key.
async fn authenticate(
    carrier: &Arc<dyn CarrierChannel>,
    config: &ServerSessionConfig,
) -> Result<SessionKey, ServerSessionError> {
    let first = carrier.recv().await?;
    // AUTH is unencrypted, so any key placeholder works for this call; the
    // codec only consults the key for non-AUTH message types.
    let placeholder_key: SessionKey = [0u8; 32];
    let (message_type, _stream_id, payload, _) =
        ghostwire_proto::unpack_frame(&first, &placeholder_key)
            .map_err(|_| ServerSessionError::AuthFailed)?;

    if message_type != MessageType::Auth {
        return Err(ServerSessionError::Protocol(
            "first frame was not AUTH".into(),
        ));
    }

    let presented = std::str::from_utf8(&payload).map_err(|_| ServerSessionError::AuthFailed)?;
    if !tokens_equal(presented, &config.token) {
        warn!("authentication failed for incoming carrier");
        return Err(ServerSessionError::AuthFailed);
    }

    info!("carrier authenticated");
    Ok(derive_key(&config.token, &config.url))
}

async fn dispatch_loop(
    carrier: &Arc<dyn CarrierChannel>,
    key: &SessionKey,
    config: &ServerSessionConfig,
    tunnels: &Arc<TunnelTable>,
) -> Result<(), ServerSessionError> {
    loop {
        let raw = match carrier.recv().await {
            Ok(raw) => raw,
            Err(CarrierError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let (message_type, stream_id, payload, _) = match ghostwire_proto::unpack_frame(&raw, key)
        {
            Ok(decoded) => decoded,
            Err(_) => {
                return Err(ServerSessionError::AuthFailed);
            }
        };

        match message_type {
            MessageType::Connect => {
                handle_connect(carrier, key, config, tunnels, stream_id, &payload).await?;
            }
            MessageType::Data => {
                handle_data(carrier, key, tunnels, stream_id, &payload).await?;
            }
            MessageType::Close => {
                tunnels.remove(stream_id).await;
            }
            MessageType::Ping => {
                send_frame(carrier, key, MessageType::Pong, stream_id, &payload)
                    .await
                    .map_err(wire_err)?;
            }
            other => {
                return Err(ServerSessionError::Protocol(format!(
                    "unexpected message type on server: {other:?}"
                )));
            }
        }
    }
}

async fn handle_connect(
    carrier: &Arc<dyn CarrierChannel>,
    key: &SessionKey,
    config: &ServerSessionConfig,
    tunnels: &Arc<TunnelTable>,
    stream_id: StreamId,
    payload: &[u8],
) -> Result<(), ServerSessionError> {
    let (host, port) = match decode_connect(payload) {
        Ok(pair) => pair,
        Err(e) => {
            return Err(ServerSessionError::Protocol(format!(
                "malformed CONNECT payload: {e}"
            )));
        }
    };

    let dial = tokio::time::timeout(config.dial_timeout, TcpStream::connect((host.as_str(), port)))
        .await;

    let stream = match dial {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            send_frame(
                carrier,
                key,
                MessageType::Error,
                stream_id,
                format!("dial failed: {e}").as_bytes(),
            )
            .await
            .map_err(wire_err)?;
            return Ok(());
        }
        Err(_) => {
            send_frame(
                carrier,
                key,
                MessageType::Error,
                stream_id,
                b"dial timed out",
            )
            .await
            .map_err(wire_err)?;
            return Ok(());
        }
    };

    debug!(stream_id, host = %host, port, "dialed remote, registering tunnel");
    let (read_half, write_half) = stream.into_split();
    let tunnel = Arc::new(Tunnel::new(write_half));
    if !tunnels.insert(stream_id, tunnel).await {
        // Table already closed (carrier tearing down); drop the fresh dial.
        return Ok(());
    }

    crate::pump::spawn_remote_pump(carrier.clone(), *key, tunnels.clone(), stream_id, read_half);
    Ok(())
}

async fn handle_data(
    carrier: &Arc<dyn CarrierChannel>,
    key: &SessionKey,
    tunnels: &Arc<TunnelTable>,
    stream_id: StreamId,
    payload: &[u8],
) -> Result<(), ServerSessionError> {
    let Some(tunnel) = tunnels.get(stream_id).await else {
        return Ok(()); // stream already retired; drop silently
    };
    if tunnel.write(payload).await.is_err() {
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
    Ok(())
}

fn wire_err(e: WireError) -> ServerSessionError {
    match e {
        WireError::Carrier(c) => ServerSessionError::Carrier(c),
        WireError::Codec(c) => ServerSessionError::Protocol(c.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_session_config_default_dial_timeout() {
        let config = ServerSessionConfig::new("tok".into(), "ws://127.0.0.1:9443/ws".into());
        assert_eq!(config.dial_timeout, Duration::from_secs(10));
    }
}
