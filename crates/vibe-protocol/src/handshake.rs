//! URI query-string handshake.
//!
//! The first payload on every transport is a query string rather than JSON.
//! The socket announces its liveness parameters:
//!
//! ```text
//! ?heartbeat=20000&_heartbeat=5000
//! ```
//!
//! and the HTTP transports learn their assigned id from the peer's
//! handshake output (`?id=...`).

use std::collections::HashMap;
use std::time::Duration;

use url::form_urlencoded;

use crate::error::ProtocolError;

const HEARTBEAT: &str = "heartbeat";
const HANDSHAKE_TIMEOUT: &str = "_heartbeat";
const ID: &str = "id";

/// Liveness parameters negotiated when a socket is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Maximum silence between heartbeats before the socket is closed.
    pub heartbeat: Duration,
    /// How long the peer waits for the heartbeat acknowledgment.
    pub handshake_timeout: Duration,
}

impl Handshake {
    pub fn new(heartbeat: Duration, handshake_timeout: Duration) -> Self {
        Self {
            heartbeat,
            handshake_timeout,
        }
    }

    /// Encode as `?heartbeat=<ms>&_heartbeat=<ms>`.
    pub fn encode(&self) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(HEARTBEAT, &self.heartbeat.as_millis().to_string())
            .append_pair(HANDSHAKE_TIMEOUT, &self.handshake_timeout.as_millis().to_string())
            .finish();
        format!("?{query}")
    }

    pub fn decode(payload: &str) -> Result<Self, ProtocolError> {
        let params = parse_query(payload);
        Ok(Self {
            heartbeat: millis(&params, HEARTBEAT)?,
            handshake_timeout: millis(&params, HANDSHAKE_TIMEOUT)?,
        })
    }
}

fn millis(params: &HashMap<String, String>, name: &'static str) -> Result<Duration, ProtocolError> {
    let value = params.get(name).map(String::as_str).unwrap_or_default();
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ProtocolError::MalformedHandshake {
            name,
            value: value.to_string(),
        })
}

/// Decode the query part of `payload` into a map.
///
/// Accepts a bare `?a=b` string as well as a full URI. Text before the
/// first `?` and after the first `#` is ignored. Without a `?` the whole
/// payload is treated as the query. Later duplicates win.
pub fn parse_query(payload: &str) -> HashMap<String, String> {
    let query = match payload.split_once('?') {
        Some((_, rest)) => rest,
        None => payload,
    };
    let query = query.split_once('#').map_or(query, |(q, _)| q);
    form_urlencoded::parse(query.trim().as_bytes())
        .into_owned()
        .collect()
}

/// Extract the transport id from a peer's handshake output.
pub fn transport_id(payload: &str) -> Result<String, ProtocolError> {
    parse_query(payload)
        .remove(ID)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProtocolError::MissingTransportId(payload.to_string()))
}
