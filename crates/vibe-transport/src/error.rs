//! Transport failures.

use thiserror::Error;
use vibe_protocol::ProtocolError;

/// Why a transport failed. Every variant is followed by `close`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer answered with status {0}")]
    Status(u16),

    #[error("invalid uri: {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("{uri} is not a {expected} uri")]
    UnsupportedUri { uri: String, expected: &'static str },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
