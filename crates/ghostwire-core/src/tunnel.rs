use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// 32-bit stream identifier, allocated monotonically by whichever endpoint
/// originates a CONNECT (always the client in this design).
pub type StreamId = u32;

/// A live bidirectional TCP stream associated with one [`StreamId`]. Only
/// the write half is owned here: the read half is moved into a dedicated
/// pump task that emits `DATA`/`CLOSE` frames on its own, so the only thing
/// the dispatch loop needs is somewhere to deliver inbound `DATA` payloads.
pub struct Tunnel {
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl Tunnel {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Writes `data` to the local socket. Returns `Ok(())` even for a
    /// zero-length `data` (a valid, non-closing DATA payload). Returns an
    /// I/O error on write failure; callers are responsible for retiring the
    /// stream afterwards.
    pub async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.write_all(data).await,
            None => Ok(()), // already closed: a racing write is a silent no-op
        }
    }

    /// Idempotent: closes the write half if still open, otherwise does
    /// nothing.
    pub async fn close(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
    }
}

struct TunnelTableInner {
    tunnels: HashMap<StreamId, Arc<Tunnel>>,
    closed: bool,
}

/// Registry mapping [`StreamId`] to live [`Tunnel`]s for one carrier.
/// Concurrency-safe: the receive dispatcher and the local accept loop both
/// insert, pump tasks and the dispatcher both remove, and carrier teardown
/// calls [`TunnelTable::close_all`] exactly once. All operations are
/// linearized behind a single async mutex, mirroring the locking shape of
/// the stream-id bookkeeping in a multiplexer, scoped down here to a plain
/// present/absent registry since GhostWire has no intermediate per-stream
/// states to track.
pub struct TunnelTable {
    inner: Mutex<TunnelTableInner>,
}

impl TunnelTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TunnelTableInner {
                tunnels: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Inserts `tunnel` under `id`. Returns `false` without inserting if
    /// `close_all` has already run (the table is permanently closed).
    pub async fn insert(&self, id: StreamId, tunnel: Arc<Tunnel>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }
        inner.tunnels.insert(id, tunnel);
        true
    }

    pub async fn get(&self, id: StreamId) -> Option<Arc<Tunnel>> {
        let inner = self.inner.lock().await;
        inner.tunnels.get(&id).cloned()
    }

    /// Removes and closes the tunnel for `id`, if present. Idempotent:
    /// calling twice for the same id is safe, the second call simply
    /// returns `None`.
    pub async fn remove(&self, id: StreamId) -> Option<Arc<Tunnel>> {
        let tunnel = {
            let mut inner = self.inner.lock().await;
            inner.tunnels.remove(&id)
        };
        if let Some(tunnel) = &tunnel {
            tunnel.close().await;
        }
        tunnel
    }

    /// Closes every tunnel currently registered and marks the table closed:
    /// any later `insert` becomes a no-op. Safe to call more than once.
    pub async fn close_all(&self) {
        let drained = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            std::mem::take(&mut inner.tunnels)
        };
        for (_, tunnel) in drained {
            tunnel.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.tunnels.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TunnelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn tunnel_pair() -> (Arc<Tunnel>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, (server, _)) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
        let client = client.unwrap();
        let (_read, write) = server.into_split();
        (Arc::new(Tunnel::new(write)), client)
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let table = TunnelTable::new();
        let (tunnel, _client) = tunnel_pair().await;
        assert!(table.insert(1, tunnel).await);
        assert!(table.get(1).await.is_some());
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_absent_after() {
        let table = TunnelTable::new();
        let (tunnel, _client) = tunnel_pair().await;
        table.insert(1, tunnel).await;

        assert!(table.remove(1).await.is_some());
        assert!(table.get(1).await.is_none());
        assert!(table.remove(1).await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_empties_table() {
        let table = TunnelTable::new();
        let (t1, _c1) = tunnel_pair().await;
        let (t2, _c2) = tunnel_pair().await;
        table.insert(1, t1).await;
        table.insert(2, t2).await;

        table.close_all().await;
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_after_close_all_is_no_op() {
        let table = TunnelTable::new();
        table.close_all().await;

        let (tunnel, _client) = tunnel_pair().await;
        assert!(!table.insert(1, tunnel).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_write_after_close_is_silent_no_op() {
        let (tunnel, _client) = tunnel_pair().await;
        tunnel.close().await;
        assert!(tunnel.write(b"hello").await.is_ok());
    }
}
