//! Event type names reserved by the protocol.
//!
//! Every other type string belongs to the application.

/// Reserved event names.
pub struct EventNames;

impl EventNames {
    /// Carries a [`ReplyEnvelope`](crate::ReplyEnvelope) answering an earlier event.
    pub const REPLY: &str = "reply";

    /// Liveness check from the peer, and the socket's acknowledgment of it.
    pub const HEARTBEAT: &str = "heartbeat";
}

