//! Vibe Server: sockets on top of transports.
//!
//! A [`Socket`] wraps any [`Transport`](vibe_transport::Transport) and turns
//! its raw text frames into typed [`SocketEvent`]s. It handles:
//! - JSON event framing with per-socket event ids
//! - Request/reply correlation in both directions
//! - Heartbeat-based liveness detection
//!
//! [`ServerFactory`] holds the protocol-wide settings and publishes a new
//! socket for every transport handed to it.

pub mod error;
mod heartbeat;
pub mod reply;
pub mod server;
pub mod socket;

pub use error::{ReplyError, SocketError};
pub use heartbeat::HeartbeatState;
pub use reply::{LatchState, Reply, ReplyCallbacks, ReplyFuture};
pub use server::{Accepted, ServerConfig, ServerFactory};
pub use socket::{Message, Socket, SocketEvent, SocketEvents};
