//! Callback interface into the application layer.

use std::net::SocketAddr;

/// Application-level callbacks driven by the networking layer.
///
/// The game controller implements this; the networking layer calls into it
/// from its accept loop and reader tasks, so implementations must be cheap
/// and non-blocking (typically forwarding events over a channel).
pub trait Controller: Send + Sync + 'static {
    /// Called once per accepted inbound socket, before the peer is
    /// registered or any frame has been read from it.
    fn incoming_connection(&self, addr: SocketAddr, port: u16);

    /// Called once per decoded, non-sentinel frame.
    fn receive_remote_message(&self, payload: String);

    /// Called when a reader detects the remote side closed the stream.
    fn remote_close_connection(&self, addr: SocketAddr);
}
