//! HTTP streaming transport.
//!
//! One persistent `GET <uri>&when=open` whose body never completes on its
//! own. The first record is the peer's handshake output (`?id=...`); every
//! later record is a text message. The end of the body is the end of the
//! transport, whether the peer finished it or `abort` cut it short.

use std::sync::Arc;

use tracing::debug;
use vibe_protocol::transport_id;

use crate::base::HttpBase;
use crate::error::TransportError;
use crate::framing::RecordDecoder;
use crate::transport::{Payload, Transport, TransportEvent, TransportEvents};

pub const TRANSPORT_NAME: &str = "stream";

pub struct StreamTransport {
    base: Arc<HttpBase>,
}

impl StreamTransport {
    /// `uri` must be `http(s)` and carry `transport=stream`.
    pub fn new(uri: &str, client: reqwest::Client) -> Result<(Self, TransportEvents), TransportError> {
        let (base, events) = HttpBase::new(uri, TRANSPORT_NAME, client)?;
        Ok((Self { base: Arc::new(base) }, events))
    }
}

impl Transport for StreamTransport {
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

    let mut response = tokio::select! {
        biased;
        () = aborted.fired() => return base.finish(),
        response = base.get(&[("when", "open")]) => match response {
            Ok(response) => response,
            Err(err) => return base.fail(err),
        },
    };

    let mut decoder = RecordDecoder::new();
    let mut handshaken = false;
    loop {
        let chunk = tokio::select! {
            biased;
            () = aborted.fired() => break,
            chunk = response.chunk() => chunk,
        };
        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!(transport = TRANSPORT_NAME, "response ended");
                break;
            }
            Err(err) => return base.fail(err.into()),
        };
        for record in decoder.feed(&chunk) {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    // Records before the malformed one were already delivered.
                    base.protocol_failure(err);
                    break;
                }
            };
            if handshaken {
                base.emitter.emit(TransportEvent::Text(record));
                continue;
            }
            match transport_id(&record) {
                Ok(id) => {
                    base.set_id(id);
                    handshaken = true;
                    base.emitter.emit(TransportEvent::Open);
                }
                Err(err) => {
                    base.protocol_failure(err);
                    break;
                }
            }
        }
    }
    base.finish();
}
