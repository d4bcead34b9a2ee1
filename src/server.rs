//! The peer-to-peer connection manager.
//!
//! Owns the accept loop, outbound dialing, per-connection reader tasks and
//! all message sending. One task runs the accept loop and one task runs per
//! connection; writes go through the registry handles, independent of the
//! reader tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::controller::Controller;
use crate::error::{NetError, NetResult};
use crate::framing::{TextCodec, CLOSE_SENTINEL, CONFIRM_TAG};
use crate::registry::{ConnectionRegistry, PeerHandle};

/// State of the currently bound listener.
struct ListenerState {
    /// The bound port, including one assigned by the OS for port 0.
    port: u16,
    /// Cancels the accept loop.
    shutdown: CancellationToken,
    /// The accept loop task, awaited on rebind so the old socket is
    /// released before the new bind.
    task: JoinHandle<()>,
}

/// A peer node: listens for inbound connections, dials outbound ones, and
/// exchanges length-framed text messages with every registered peer.
///
/// There is no protocol-level distinction between who dialed whom; both
/// sides end up with the same per-connection reader and registry entry.
pub struct PeerServer<C: Controller> {
    controller: Arc<C>,
    registry: Arc<ConnectionRegistry>,
    listener: Mutex<Option<ListenerState>>,
}

impl<C: Controller> PeerServer<C> {
    /// Create a server that reports connection and message events to the
    /// given controller. No socket is bound until [`start_listening`].
    ///
    /// [`start_listening`]: PeerServer::start_listening
    pub fn new(controller: Arc<C>) -> Self {
        Self {
            controller,
            registry: Arc::new(ConnectionRegistry::new()),
            listener: Mutex::new(None),
        }
    }

    // ==============================================================
    //                          LISTENING
    // ==============================================================

    /// Bind a port (0 = OS-assigned) and start accepting connections in a
    /// background task. An already-running accept loop is shut down first,
    /// so this doubles as a rebind. Returns the actually bound port.
    pub async fn start_listening(&self, port: u16) -> NetResult<u16> {
        let mut state = self.listener.lock().await;

        if let Some(old) = state.take() {
            old.shutdown.cancel();
            // Wait for the old loop to drop its socket before rebinding
            let _ = old.task.await;
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_port = listener.local_addr()?.port();
        info!("Listening for peers on port {}", local_port);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Self::accept_loop(
            listener,
            shutdown.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.controller),
        ));

        *state = Some(ListenerState {
            port: local_port,
            shutdown,
            task,
        });

        Ok(local_port)
    }

    /// Rebind to the port most recently bound, including one the OS chose.
    pub async fn restart_listening(&self) -> NetResult<u16> {
        let port = self.local_port().await.ok_or(NetError::NotListening)?;
        self.start_listening(port).await
    }

    /// Stop accepting inbound connections. Existing connections stay up.
    pub async fn stop_listening(&self) {
        let mut state = self.listener.lock().await;
        if let Some(old) = state.take() {
            old.shutdown.cancel();
            let _ = old.task.await;
        }
    }

    /// The currently bound listening port, if any.
    pub async fn local_port(&self) -> Option<u16> {
        self.listener.lock().await.as_ref().map(|s| s.port)
    }

    /// Accepts inbound sockets until cancelled. Each accept notifies the
    /// controller before any registry mutation, then hands the socket to a
    /// reader task.
    async fn accept_loop(
        listener: TcpListener,
        shutdown: CancellationToken,
        registry: Arc<ConnectionRegistry>,
        controller: Arc<C>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Accept loop stopped");
                    return;
                }
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        info!("Receive connection on {}", peer_addr);
                        controller.incoming_connection(peer_addr, peer_addr.port());
                        Self::spawn_reader(
                            stream,
                            peer_addr,
                            Arc::clone(&registry),
                            Arc::clone(&controller),
                        );
                    }
                    Err(e) => {
                        // Transient (e.g. socket closed from another task)
                        warn!("Accept failed: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    // ==============================================================
    //                           CONNECT
    // ==============================================================

    /// Dial a remote peer and start reading from it, exactly as if it had
    /// connected to us. Returns the resolved address, which is the registry
    /// key for the new connection.
    ///
    /// Fails with [`NetError::UnknownHost`] if the host does not resolve,
    /// and with [`NetError::SelfConnection`], before any dial is attempted,
    /// if the target is this instance's own listening endpoint.
    pub async fn connect_to(&self, host: &str, port: u16) -> NetResult<SocketAddr> {
        let addr = lookup_host((host, port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| NetError::UnknownHost(host.to_string()))?;

        if let Some(local_port) = self.local_port().await {
            let ip = addr.ip();
            if (ip.is_loopback() || ip.is_unspecified()) && addr.port() == local_port {
                return Err(NetError::SelfConnection { addr });
            }
        }

        let stream = TcpStream::connect(addr).await?;
        info!("Connected to peer {}", addr);
        Self::spawn_reader(
            stream,
            addr,
            Arc::clone(&self.registry),
            Arc::clone(&self.controller),
        );

        Ok(addr)
    }

    /// Whether at least one registered connection is still open.
    pub async fn has_connection(&self) -> bool {
        self.registry.has_open_connection().await
    }

    /// Addresses of all currently registered peers, in registration order.
    pub async fn connected_peers(&self) -> Vec<SocketAddr> {
        self.registry.addrs().await
    }

    // ==============================================================
    //                        COMMUNICATION
    // ==============================================================

    /// One reader task per connection: registers the peer, then decodes
    /// frames and dispatches them until the stream ends, the close sentinel
    /// arrives, or local teardown cancels it.
    fn spawn_reader(
        stream: TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        controller: Arc<C>,
    ) {
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            let shutdown = CancellationToken::new();
            let handle = Arc::new(PeerHandle::new(peer_addr, write_half, shutdown.clone()));
            registry.insert(handle).await;

            let mut frames = FramedRead::new(read_half, TextCodec::new());

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        // Closed from this side; teardown already handled
                        // deregistration, so exit without notifying.
                        debug!("Reader for {} stopped by local close", peer_addr);
                        return;
                    }
                    frame = frames.next() => match frame {
                        Some(Ok(payload)) => {
                            if payload == CLOSE_SENTINEL {
                                // Historical protocol quirk: the sentinel only
                                // ends the decode loop. The socket stays open
                                // and the peer stays registered until closed
                                // explicitly.
                                debug!("Reader for {} stopped by close sentinel", peer_addr);
                                return;
                            }
                            debug!("{} -> local: {}", peer_addr, payload);
                            controller.receive_remote_message(payload);
                        }
                        Some(Err(e)) => {
                            warn!("Decode failure from {}: {}", peer_addr, e);
                            break;
                        }
                        None => {
                            debug!("Stream from {} ended", peer_addr);
                            break;
                        }
                    }
                }
            }

            // Remote closed. Deregister and notify, unless teardown on this
            // side already removed the entry.
            if registry.remove(&peer_addr).await.is_some() {
                controller.remote_close_connection(peer_addr);
            }
        });
    }

    /// Encode and write one frame to a single peer. Sending to an address
    /// that is not registered is reported and ignored, never an error.
    pub async fn send(&self, target: &SocketAddr, message: &str) -> NetResult<()> {
        let Some(handle) = self.registry.get(target).await else {
            warn!(
                "Cannot send message {:?} without connection to {}",
                message, target
            );
            return Ok(());
        };
        handle.send(message.to_owned()).await
    }

    /// Write one frame to every registered peer, in registration order.
    /// Iterates a snapshot, so peers joining or leaving mid-broadcast do not
    /// disturb the traversal. The first write failure aborts the remaining
    /// sends in this call.
    pub async fn broadcast(&self, message: &str) -> NetResult<()> {
        let peers = self.registry.snapshot().await;
        if peers.is_empty() {
            warn!("Cannot broadcast message {:?} without connection", message);
            return Ok(());
        }

        for peer in peers {
            peer.send(message.to_owned()).await?;
        }
        Ok(())
    }

    /// Acknowledge a just-accepted connection by sending the reserved
    /// confirm payload as an ordinary frame. What the tag means is up to
    /// the application layer on the other side.
    pub async fn confirm_connection(&self, target: &SocketAddr) -> NetResult<()> {
        self.send(target, CONFIRM_TAG).await
    }

    // ==============================================================
    //                           TEARDOWN
    // ==============================================================

    /// Close the connection to one peer and remove it from the registry.
    /// Calling this for an address that is not registered is a no-op, so a
    /// second close is always safe.
    pub async fn close_connection(&self, addr: &SocketAddr) -> NetResult<()> {
        if let Some(handle) = self.registry.remove(addr).await {
            info!("Closing connection to {}", addr);
            handle.close().await?;
        }
        Ok(())
    }

    /// Close every registered connection, iterating a point-in-time
    /// snapshot of the registry keys.
    pub async fn close_all_connections(&self) -> NetResult<()> {
        for addr in self.registry.addrs().await {
            self.close_connection(&addr).await?;
        }
        Ok(())
    }
}
