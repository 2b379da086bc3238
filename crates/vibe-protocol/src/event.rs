//! Event and reply envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProtocolError;
use crate::names::EventNames;

/// One structured message exchanged over a socket.
///
/// `id` is unique within the sender's outbound stream and means nothing
/// to the receiver beyond correlating a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque application payload. Missing on the wire means `null`.
    #[serde(default)]
    pub data: Value,
    /// True if the sender waits for a `reply` event answering this one.
    pub reply: bool,
}

impl Event {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, data: Value, reply: bool) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            data,
            reply,
        }
    }

    /// Parse one JSON text frame. `id`, `type` and `reply` are required.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedEvent)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn is_reply(&self) -> bool {
        self.event_type == EventNames::REPLY
    }
}

/// The `data` of a `reply` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Id of the event being answered.
    pub id: String,
    #[serde(default)]
    pub data: Value,
    /// True when the remote handler rejected rather than resolved.
    pub exception: bool,
}

impl ReplyEnvelope {
    pub fn resolved(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            exception: false,
        }
    }

    pub fn rejected(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            exception: true,
        }
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value).map_err(ProtocolError::MalformedReply)
    }

    pub fn into_value(self) -> Value {
        json!({
            "id": self.id,
            "data": self.data,
            "exception": self.exception,
        })
    }
}
