//! Session state machines shared by the GhostWire client and server: the
//! per-carrier tunnel registry, the transport-agnostic carrier abstraction,
//! the server- and client-side dispatch loops, and the client's reconnect
//! supervisor.

mod carrier;
mod client_session;
mod close_payload;
mod connect_payload;
mod pump;
mod server_session;
mod supervisor;
mod tunnel;
mod wire;

pub use carrier::{CarrierChannel, CarrierError};
pub use client_session::{run_client_session, ClientSessionConfig, ClientSessionError, PortMapping};
pub use close_payload::{decode_close, encode_close, CLOSE_REASON_EOF, CLOSE_REASON_IO_ERROR};
pub use connect_payload::{decode_connect, encode_connect, ConnectPayloadError};
pub use server_session::{run_server_session, ServerSessionConfig, ServerSessionError};
pub use supervisor::{ReconnectConfig, ShutdownSignal, Supervisor, SupervisorState};
pub use tunnel::{StreamId, Tunnel, TunnelTable};
