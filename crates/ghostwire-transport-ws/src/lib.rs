//! Concrete [`ghostwire_core::CarrierChannel`] implementation over
//! `tokio-tungstenite`, for both the client dial side and the server
//! accept side.

mod carrier;
mod error;

pub use carrier::{accept_server, connect_client, WsCarrier};
pub use error::TransportError;
