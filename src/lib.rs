//! Peer-to-peer TCP messaging layer for the maze game.
//!
//! Each instance both listens for inbound connections and dials outbound
//! ones; once a socket is up there is no distinction between the two. Live
//! connections are tracked in a [`ConnectionRegistry`], one reader task per
//! connection decodes length-framed UTF-8 text messages, and decoded
//! messages flow to an application-supplied [`Controller`].
//!
//! Wire format: a 2-byte unsigned big-endian length field, then exactly
//! that many UTF-8 payload bytes. See [`framing`] for the codec and the
//! reserved payload values.
//!
//! This layer delivers messages in per-socket stream order only and does no
//! authentication, peer discovery, or reconnection; all of that is the
//! application's responsibility.

pub mod controller;
pub mod error;
pub mod framing;
pub mod registry;
pub mod resolver;
pub mod server;

pub use controller::Controller;
pub use error::{NetError, NetResult};
pub use framing::{TextCodec, CLOSE_SENTINEL, CONFIRM_TAG, MAX_PAYLOAD_SIZE};
pub use registry::{ConnectionRegistry, PeerHandle};
pub use resolver::local_address;
pub use server::PeerServer;
