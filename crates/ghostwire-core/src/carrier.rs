use async_trait::async_trait;
use bytes::Bytes;

/// Errors raised by a [`CarrierChannel`] implementation. Grounded on the
/// transport-error taxonomy used for the underlying message transport,
/// narrowed to what the session state machines need to distinguish.
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    /// The peer closed the carrier gracefully (a WebSocket close frame, or
    /// `close()` was called locally).
    #[error("carrier closed")]
    Closed,
    /// A transport-level I/O failure.
    #[error("carrier I/O error: {0}")]
    Io(String),
    /// A protocol violation: a non-binary message, a frame whose type is
    /// unknown, or any other well-formed-but-disallowed input.
    #[error("carrier protocol error: {0}")]
    Protocol(String),
    /// `send`/`recv` exceeded its deadline.
    #[error("carrier operation timed out")]
    Timeout,
}

/// Transport-agnostic abstraction over one carrier: a single authenticated
/// bidirectional message channel on which exactly one wire frame travels
/// per `send`/`recv` call. Implementations must guarantee binary-only
/// framing (no text messages) and idempotent `close`.
///
/// Grounded on the `Transport` trait used for the underlying point-to-point
/// message channel in the example pack's websocket transport crate
/// (`send`/`recv`/`close`/`is_connected`), narrowed to GhostWire's carrier
/// semantics.
#[async_trait]
pub trait CarrierChannel: Send + Sync {
    /// Sends one complete frame (header + payload) as a single message.
    async fn send(&self, frame: Bytes) -> Result<(), CarrierError>;

    /// Receives one complete frame as a single message. Returns
    /// `Err(CarrierError::Closed)` once the peer has closed gracefully.
    async fn recv(&self) -> Result<Bytes, CarrierError>;

    /// Idempotent: after the first call, all future `send`/`recv` fail with
    /// [`CarrierError::Closed`].
    async fn close(&self);

    fn is_connected(&self) -> bool;
}
