//! Protocol-level failures.
//!
//! Each of these closes the socket or transport that observed it.

use thiserror::Error;

/// A peer sent something the protocol cannot interpret.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    MalformedEvent(#[source] serde_json::Error),

    #[error("malformed reply envelope: {0}")]
    MalformedReply(#[source] serde_json::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed handshake parameter {name}={value:?}")]
    MalformedHandshake { name: &'static str, value: String },

    #[error("handshake payload carries no transport id: {0:?}")]
    MissingTransportId(String),

    #[error("unexpected content-type {0:?}")]
    UnexpectedContentType(String),

    #[error("text payload is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("stream record does not start with `data: `: {0:?}")]
    MalformedRecord(String),
}
