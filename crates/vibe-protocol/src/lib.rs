//! Vibe Protocol - Wire Types
//!
//! JSON event envelope, reply envelope and URI-encoded handshake used by
//! every Vibe socket regardless of the transport that carries the bytes.
//! This crate does no I/O.

pub mod error;
pub mod event;
pub mod handshake;
pub mod names;

pub use error::ProtocolError;
pub use event::{Event, ReplyEnvelope};
pub use handshake::{Handshake, parse_query, transport_id};
pub use names::EventNames;
