//! HTTP long polling transport.
//!
//! Emulates a push connection with sequential `GET` exchanges:
//!
//! ```text
//! GET <uri>&when=open           -> handshake output, e.g. `?id=...`
//! GET <uri>&when=poll&id=<id>   -> one message, or an empty body on close
//! GET <uri>&when=poll&id=<id>   -> ...
//! ```
//!
//! The next poll is always issued before the previous response is
//! interpreted, so the peer never faces a window without a request to push
//! into.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use vibe_protocol::{ProtocolError, transport_id};

use crate::base::{self, AbortSignal, Exchange, HttpBase, Settled};
use crate::error::TransportError;
use crate::transport::{Payload, Transport, TransportEvent, TransportEvents};

pub const TRANSPORT_NAME: &str = "longpoll";

/// How a poll response body is framed, according to its `content-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Text,
    Binary,
}

impl BodyKind {
    /// Only the exact spellings peers are known to send are accepted.
    pub fn classify(content_type: &str) -> Option<Self> {
        match content_type.to_ascii_lowercase().as_str() {
            "text/plain; charset=utf-8"
            | "text/plain; charset=utf8"
            | "text/plain;charset=utf-8"
            | "text/plain;charset=utf8" => Some(Self::Text),
            "application/octet-stream" => Some(Self::Binary),
            _ => None,
        }
    }
}

pub struct LongPollTransport {
    base: Arc<HttpBase>,
}

impl LongPollTransport {
    /// `uri` must be `http(s)` and carry `transport=longpoll`.
    pub fn new(uri: &str, client: reqwest::Client) -> Result<(Self, TransportEvents), TransportError> {
        let (base, events) = HttpBase::new(uri, TRANSPORT_NAME, client)?;
        Ok((Self { base: Arc::new(base) }, events))
    }
}

impl Transport for LongPollTransport {
    fn uri(&self) -> &str {
        self.base.uri()
    }

    fn id(&self) -> Option<String> {
        self.base.id()
    }

    fn connect(&self) {
        if !self.base.start() {
            debug!(transport = TRANSPORT_NAME, "already connected");
            return;
        }
        tokio::spawn(run(Arc::clone(&self.base)));
    }

    fn send(&self, payload: Payload) {
        self.base.send(payload);
    }

    fn abort(&self) {
        self.base.abort();
    }

    fn close(&self) {
        self.base.close();
    }
}

async fn run(base: Arc<HttpBase>) {
    let mut aborted = base.abort_signal();

    let open = base.spawn_exchange(vec![("when", "open".to_string())]);
    let handshake = match base::settle(open, &mut aborted).await {
        Settled::Done(exchange) => exchange,
        Settled::Failed(err) => return base.fail(err),
        Settled::Aborted => return base.finish(),
    };
    let id = match handshake_id(handshake) {
        Ok(id) => id,
        Err(err) => return base.fail(err.into()),
    };
    base.set_id(id.clone());

    let outcome = poll_loop(
        &mut aborted,
        || poll(&base, &id),
        || base.emitter.emit(TransportEvent::Open),
        |exchange| dispatch(&base, exchange),
    )
    .await;
    match outcome {
        Ok(()) => base.finish(),
        Err(err) => base.fail(err),
    }
}

/// Poll until the peer sends an empty body or the transport is aborted.
///
/// The next poll is in flight before `open` fires, so a close from the open
/// handler has a request to abort, and before every non-empty body is
/// dispatched, so the peer always has a request to push into.
async fn poll_loop<P, O, D>(
    aborted: &mut AbortSignal,
    mut poll: P,
    open: O,
    mut dispatch: D,
) -> Result<(), TransportError>
where
    P: FnMut() -> JoinHandle<Result<Exchange, TransportError>>,
    O: FnOnce(),
    D: FnMut(Exchange),
{
    let mut pending = poll();
    open();

    loop {
        match base::settle(pending, aborted).await {
            Settled::Done(exchange) if exchange.body.is_empty() => {
                debug!(transport = TRANSPORT_NAME, "peer ended the exchange");
                return Ok(());
            }
            Settled::Done(exchange) => {
                pending = poll();
                dispatch(exchange);
            }
            Settled::Failed(err) => return Err(err),
            Settled::Aborted => return Ok(()),
        }
    }
}

fn poll(base: &Arc<HttpBase>, id: &str) -> JoinHandle<Result<Exchange, TransportError>> {
    base.spawn_exchange(vec![("when", "poll".to_string()), ("id", id.to_string())])
}

fn handshake_id(exchange: Exchange) -> Result<String, ProtocolError> {
    let text = String::from_utf8(exchange.body.to_vec())?;
    transport_id(&text)
}

fn dispatch(base: &Arc<HttpBase>, exchange: Exchange) {
    let content_type = exchange.content_type.unwrap_or_default();
    match BodyKind::classify(&content_type) {
        Some(BodyKind::Text) => match String::from_utf8(exchange.body.to_vec()) {
            Ok(text) => base.emitter.emit(TransportEvent::Text(text)),
            Err(err) => base.protocol_failure(err.into()),
        },
        Some(BodyKind::Binary) => base.emitter.emit(TransportEvent::Binary(exchange.body)),
        None => base.protocol_failure(ProtocolError::UnexpectedContentType(content_type)),
    }
}
