//! Socket-level failures.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use vibe_protocol::ProtocolError;
use vibe_transport::TransportError;

/// Carried by [`SocketEvent::Error`](crate::SocketEvent::Error). Always
/// followed by `close`.
#[derive(Debug, Clone, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(Arc<TransportError>),

    #[error(transparent)]
    Protocol(Arc<ProtocolError>),

    #[error("no heartbeat within {interval:?}")]
    HeartbeatTimeout { interval: Duration },
}

/// Why a [`ReplyFuture`](crate::ReplyFuture) did not resolve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplyError {
    #[error("peer rejected the event: {0}")]
    Rejected(Value),

    #[error("socket closed before a reply arrived")]
    Closed,
}
