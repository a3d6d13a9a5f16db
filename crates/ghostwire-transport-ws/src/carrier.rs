use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use ghostwire_core::{CarrierChannel, CarrierError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Interval for the transport-level WebSocket ping, complementary to the
/// application-level PING/PONG frames. Chosen to match CDN-friendly
/// keepalive behaviour observed in the original implementation this
/// protocol was distilled from, rather than to replace the application
/// heartbeat.
const NATIVE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// One carrier, backed by a `tokio-tungstenite` WebSocket split into a
/// dedicated writer task (the only place frames are sent, fed by an
/// outbound queue) and a dedicated reader task (fans inbound binary
/// messages into a queue `recv` drains). Mirrors the single-writer
/// reader/writer-task split used by the example pack's own WebSocket
/// connection wrapper, scoped down to GhostWire's one-frame-per-message
/// carrier instead of a per-stream multiplexed channel set.
pub struct WsCarrier {
    outbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<mpsc::Receiver<Bytes>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl WsCarrier {
    fn spawn<S>(ws_stream: WebSocketStream<S>) -> Arc<Self>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let writer_connected = connected.clone();
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(NATIVE_HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    maybe_msg = outbound_rx.recv() => {
                        match maybe_msg {
                            Some(msg) => {
                                if sink.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = heartbeat.tick() => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    _ = writer_shutdown.notified() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
            let _ = sink.close().await;
        });

        let reader_connected = connected.clone();
        let reply_tx = outbound_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        if inbound_tx.send(Bytes::from(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if reply_tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        debug!("carrier closed by peer");
                        break;
                    }
                    Ok(Message::Text(_)) => {
                        warn!("rejecting text frame: carrier is binary-only");
                        break;
                    }
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        warn!("carrier read error: {e}");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            drop(inbound_tx);
        });

        Arc::new(Self {
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            connected,
            shutdown,
        })
    }
}

#[async_trait]
impl CarrierChannel for WsCarrier {
    async fn send(&self, frame: Bytes) -> Result<(), CarrierError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CarrierError::Closed);
        }
        self.outbound_tx
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|_| CarrierError::Closed)
    }

    async fn recv(&self) -> Result<Bytes, CarrierError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.ok_or(CarrierError::Closed)
    }

    async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return; // already closed
        }
        self.shutdown.notify_waiters();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Dials `url` and returns a running carrier. Grounded on the
/// `connect_async`-based transport-connect pattern used for the example
/// pack's reconnecting WebSocket transport.
pub async fn connect_client(url: &str) -> Result<Arc<dyn CarrierChannel>, TransportError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    Ok(WsCarrier::spawn(ws_stream))
}

/// Completes the WebSocket handshake on an already-accepted TCP connection,
/// validating the request path against `expected_path`, and returns a
/// running carrier. Grounded on the path-validating `accept_hdr_async`
/// callback used for the example pack's WebSocket listener, minus its TLS
/// layer: GhostWire's carrier runs over plain `ws://`, with TLS termination
/// (if any) expected to happen upstream of this process, matching the
/// original implementation's plain `aiohttp` WebSocket server.
pub async fn accept_server(
    tcp_stream: TcpStream,
    expected_path: &str,
) -> Result<Arc<dyn CarrierChannel>, TransportError> {
    let expected_path = expected_path.to_string();
    let callback = move |req: &Request, response: Response| {
        let path = req.uri().path();
        if path == expected_path || path == format!("{expected_path}/") {
            Ok(response)
        } else {
            let response = Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(None)
                .unwrap();
            Err(response)
        }
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(tcp_stream, callback)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    Ok(WsCarrier::spawn(ws_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_carrier_round_trip_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_server(stream, "/ws").await.unwrap()
        });

        let client = connect_client(&format!("ws://{addr}/ws")).await.unwrap();
        let server = server_task.await.unwrap();

        client.send(Bytes::from_static(b"hello")).await.unwrap();
        let received = server.recv().await.unwrap();
        assert_eq!(&received[..], b"hello");

        server.send(Bytes::from_static(b"world")).await.unwrap();
        let received = client.recv().await.unwrap();
        assert_eq!(&received[..], b"world");
    }

    #[tokio::test]
    async fn test_carrier_close_is_observed_by_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_server(stream, "/ws").await.unwrap()
        });

        let client = connect_client(&format!("ws://{addr}/ws")).await.unwrap();
        let server = server_task.await.unwrap();

        client.close().await;
        assert!(!client.is_connected());
        let result = server.recv().await;
        assert!(matches!(result, Err(CarrierError::Closed)));
    }

    #[tokio::test]
    async fn test_accept_server_rejects_wrong_path() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_server(stream, "/expected").await
        });

        let _ = connect_client(&format!("ws://{addr}/wrong")).await;
        let result = server_task.await.unwrap();
        assert!(result.is_err());
    }
}
