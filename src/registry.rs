//! Live connection tracking.
//!
//! The registry is the single source of truth for "who is currently
//! connected". Reader tasks insert on stream acquisition and remove on
//! decode failure; teardown removes explicitly. Every operation takes the
//! lock, and anything that iterates (broadcast, close-all) works from a
//! point-in-time snapshot so concurrent connects and disconnects cannot
//! corrupt the traversal.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::SinkExt;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::error::NetResult;
use crate::framing::TextCodec;

/// One open connection to a peer.
///
/// The write half lives behind a mutex so that unicast and broadcast writes
/// targeting the same peer cannot interleave frame bytes. The cancellation
/// token stops the reader task that owns the read half.
pub struct PeerHandle {
    addr: SocketAddr,
    writer: Mutex<FramedWrite<OwnedWriteHalf, TextCodec>>,
    shutdown: CancellationToken,
}

impl PeerHandle {
    /// Wrap the write half of a freshly split socket.
    pub fn new(addr: SocketAddr, write_half: OwnedWriteHalf, shutdown: CancellationToken) -> Self {
        Self {
            addr,
            writer: Mutex::new(FramedWrite::new(write_half, TextCodec::new())),
            shutdown,
        }
    }

    /// Address of the remote endpoint; the registry key.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Token the reader task watches for local teardown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Encode and write one frame to this peer.
    pub async fn send(&self, payload: String) -> NetResult<()> {
        let mut writer = self.writer.lock().await;
        writer.send(payload).await
    }

    /// Stop the reader task and shut down the write half.
    pub async fn close(&self) -> NetResult<()> {
        self.shutdown.cancel();
        let mut writer = self.writer.lock().await;
        writer.get_mut().shutdown().await?;
        Ok(())
    }

    /// Whether this connection has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Mapping from peer address to open connection, in insertion order.
///
/// Insertion order is preserved so that broadcast iteration is
/// deterministic. Peer counts are small, so linear lookup is fine.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: RwLock<Vec<Arc<PeerHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any existing entry for the address.
    pub async fn insert(&self, handle: Arc<PeerHandle>) {
        let mut peers = self.peers.write().await;
        peers.retain(|p| p.addr() != handle.addr());
        debug!("Registering peer {}", handle.addr());
        peers.push(handle);
    }

    /// Remove and return the connection for an address, if registered.
    pub async fn remove(&self, addr: &SocketAddr) -> Option<Arc<PeerHandle>> {
        let mut peers = self.peers.write().await;
        let position = peers.iter().position(|p| p.addr() == *addr)?;
        Some(peers.remove(position))
    }

    /// Look up the connection for an address.
    pub async fn get(&self, addr: &SocketAddr) -> Option<Arc<PeerHandle>> {
        let peers = self.peers.read().await;
        peers.iter().find(|p| p.addr() == *addr).cloned()
    }

    /// Point-in-time snapshot of all connections, in insertion order.
    pub async fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.peers.read().await.clone()
    }

    /// Point-in-time snapshot of all registered addresses.
    pub async fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.read().await.iter().map(|p| p.addr()).collect()
    }

    /// Whether no peers are registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Whether at least one registered connection is not closed.
    pub async fn has_open_connection(&self) -> bool {
        self.peers.read().await.iter().any(|p| !p.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Builds a handle backed by a real loopback socket.
    async fn test_handle(registry_key_port: u16) -> Arc<PeerHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let _accepted = accepted.unwrap();
        let stream = connected.unwrap();

        let (_read_half, write_half) = stream.into_split();
        let key = SocketAddr::new("127.0.0.1".parse().unwrap(), registry_key_port);
        Arc::new(PeerHandle::new(key, write_half, CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_insertion_order_preserved() {
        let registry = ConnectionRegistry::new();
        let first = test_handle(1001).await;
        let second = test_handle(1002).await;
        let third = test_handle(1003).await;

        registry.insert(first.clone()).await;
        registry.insert(second.clone()).await;
        registry.insert(third.clone()).await;

        let addrs: Vec<u16> = registry.snapshot().await.iter().map(|p| p.addr().port()).collect();
        assert_eq!(addrs, vec![1001, 1002, 1003]);
    }

    #[tokio::test]
    async fn test_insert_replaces_duplicate_address() {
        let registry = ConnectionRegistry::new();
        let first = test_handle(2000).await;
        let replacement = test_handle(2000).await;

        registry.insert(first).await;
        registry.insert(replacement.clone()).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &replacement));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let handle = test_handle(3000).await;
        let addr = handle.addr();

        registry.insert(handle).await;
        assert!(registry.remove(&addr).await.is_some());
        assert!(registry.remove(&addr).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_connection_tracking() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.has_open_connection().await);

        let handle = test_handle(4000).await;
        registry.insert(handle.clone()).await;
        assert!(registry.has_open_connection().await);

        handle.close().await.unwrap();
        assert!(!registry.has_open_connection().await);
    }

    #[tokio::test]
    async fn test_get_returns_registered_handle() {
        let registry = ConnectionRegistry::new();
        let handle = test_handle(5000).await;
        let addr = handle.addr();

        assert!(registry.get(&addr).await.is_none());
        registry.insert(handle.clone()).await;

        let found = registry.get(&addr).await.unwrap();
        assert!(Arc::ptr_eq(&found, &handle));
    }
}
