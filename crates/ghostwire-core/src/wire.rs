use std::sync::Arc;

use bytes::Bytes;
use ghostwire_proto::{pack_frame, CodecError, MessageType, SessionKey};

use crate::carrier::{CarrierChannel, CarrierError};

/// Packs and sends one frame over `carrier`. AUTH frames are sent
/// unencrypted; every other type is packed under `key`.
pub(crate) async fn send_frame(
    carrier: &Arc<dyn CarrierChannel>,
    key: &SessionKey,
    message_type: MessageType,
    stream_id: u32,
    plaintext: &[u8],
) -> Result<(), WireError> {
    let framed = pack_frame(message_type, stream_id, plaintext, key)?;
    carrier.send(Bytes::from(framed)).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum WireError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Carrier(#[from] CarrierError),
}
