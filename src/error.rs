//! Error types for the peer networking layer.

use std::io;
use std::net::SocketAddr;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors surfaced by the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O error during bind, dial, read, write or close.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Host name could not be resolved to an address.
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// The target denotes this instance's own listening endpoint.
    #[error("Refusing to connect to own listening endpoint {addr}")]
    SelfConnection { addr: SocketAddr },

    /// Payload exceeds what the 2-byte length field can represent.
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Received frame is not valid UTF-8.
    #[error("Invalid UTF-8 payload: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    /// A listening port was required but the server never listened.
    #[error("Server is not listening")]
    NotListening,
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
