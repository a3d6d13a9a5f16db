//! Wire protocol primitives shared by the GhostWire client and server:
//! frame layout, session-key derivation, token handling, and the
//! authenticated encryption codec built on top of them.

mod codec;
mod frame;
mod keys;
mod token;

pub use codec::{decrypt, encrypt, pack_frame, unpack_frame, CodecError};
pub use frame::{pack_header, unpack_header, MessageType, HEADER_SIZE};
pub use keys::{derive_key, SessionKey, SESSION_KEY_LEN};
pub use token::{generate_token, tokens_equal, TOKEN_LEN};

/// Maximum DATA payload carried by a single frame, in bytes.
pub const MAX_DATA_PAYLOAD: usize = 65_536;

/// Stream id reserved for frames that are not associated with any stream
/// (currently unused by any message type, but reserved per the wire spec).
pub const CONTROL_STREAM_ID: u32 = 0;
