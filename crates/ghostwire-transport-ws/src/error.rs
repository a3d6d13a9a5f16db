/// Errors raised while establishing a carrier, as opposed to
/// [`ghostwire_core::CarrierError`] which covers failures once a carrier is
/// already running.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}
