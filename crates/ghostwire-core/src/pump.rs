use std::sync::Arc;

use ghostwire_proto::{MessageType, SessionKey, MAX_DATA_PAYLOAD};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::debug;

use crate::carrier::CarrierChannel;
use crate::close_payload::{encode_close, CLOSE_REASON_EOF, CLOSE_REASON_IO_ERROR};
use crate::tunnel::{StreamId, TunnelTable};
use crate::wire::send_frame;

/// Spawns a task that reads from `read_half` and emits DATA frames for
/// `stream_id` until EOF or error, then emits CLOSE and removes the
/// stream's tunnel from `tunnels`. The same shape serves both directions:
/// the server's remote-socket pump and the client's local-socket pump are
/// structurally identical, differing only in which side of the connection
/// `read_half` came from.
pub(crate) fn spawn_remote_pump(
    carrier: Arc<dyn CarrierChannel>,
    key: SessionKey,
    tunnels: Arc<TunnelTable>,
    stream_id: StreamId,
    mut read_half: OwnedReadHalf,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATA_PAYLOAD];
        let mut reason = CLOSE_REASON_EOF;
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => {
                    reason = CLOSE_REASON_IO_ERROR;
                    break;
                }
            };
            if send_frame(&carrier, &key, MessageType::Data, stream_id, &buf[..n])
                .await
                .is_err()
            {
                reason = CLOSE_REASON_IO_ERROR;
                break;
            }
        }
        debug!(stream_id, "pump ended, retiring stream");
        let _ = send_frame(&carrier, &key, MessageType::Close, stream_id, &encode_close(reason)).await;
        tunnels.remove(stream_id).await;
    });
}
