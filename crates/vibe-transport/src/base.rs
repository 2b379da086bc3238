//! Plumbing shared by the HTTP transports.
//!
//! Every HTTP transport talks to one URI carrying a `transport` query
//! parameter. Inbound traffic is transport specific; outbound traffic is the
//! same for both:
//!
//! ```text
//! send   POST <uri>&id=<id>              (one payload per request, in order)
//! close  GET  <uri>&when=abort&id=<id>   (after aborting the local exchange)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;
use vibe_protocol::ProtocolError;

use crate::error::TransportError;
use crate::transport::{Emitter, Payload, TransportEvents};

pub(crate) const TRANSPORT_PARAM: &str = "transport";
pub(crate) const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub(crate) const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// A fully buffered response.
#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) content_type: Option<String>,
    pub(crate) body: Bytes,
}

/// How an in-flight request ended.
pub(crate) enum Settled<T> {
    Done(T),
    Failed(TransportError),
    /// Terminated by `abort`. Not an error.
    Aborted,
}

/// Resolves once the transport has been aborted.
pub(crate) struct AbortSignal(watch::Receiver<bool>);

impl AbortSignal {
    pub(crate) async fn fired(&mut self) {
        // A dropped sender means the transport is gone, which also counts.
        let _ = self.0.wait_for(|aborted| *aborted).await;
    }
}

pub(crate) struct HttpBase {
    name: &'static str,
    uri: String,
    url: Url,
    client: reqwest::Client,
    id: watch::Sender<Option<String>>,
    aborted: watch::Sender<bool>,
    abort_notified: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<Payload>,
    /// Taken by the writer task on `connect`.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Payload>>>,
    pub(crate) emitter: Emitter,
}

impl HttpBase {
    pub(crate) fn new(
        uri: &str,
        name: &'static str,
        client: reqwest::Client,
    ) -> Result<(Self, TransportEvents), TransportError> {
        let url = validate_uri(uri, name)?;
        let (emitter, events) = Emitter::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (id, _) = watch::channel(None);
        let (aborted, _) = watch::channel(false);

        let base = Self {
            name,
            uri: uri.to_string(),
            url,
            client,
            id,
            aborted,
            abort_notified: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            emitter,
        };
        Ok((base, events))
    }

    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn id(&self) -> Option<String> {
        self.id.borrow().clone()
    }

    pub(crate) fn set_id(&self, id: String) {
        debug!(transport = self.name, %id, "handshake complete");
        self.id.send_replace(Some(id));
    }

    /// The transport URI with `params` appended to its query.
    pub(crate) fn url_with(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().extend_pairs(params);
        url
    }

    /// Start the writer. Returns false if the transport was already started.
    pub(crate) fn start(self: &Arc<Self>) -> bool {
        let Some(outbound) = self.outbound_rx.lock().take() else {
            return false;
        };
        tokio::spawn(write_loop(Arc::clone(self), outbound));
        true
    }

    pub(crate) fn send(&self, payload: Payload) {
        if self.is_aborted() || self.outbound_tx.send(payload).is_err() {
            debug!(transport = self.name, "dropping payload for a finished transport");
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        *self.aborted.borrow()
    }

    pub(crate) fn abort_signal(&self) -> AbortSignal {
        AbortSignal(self.aborted.subscribe())
    }

    /// Raise the abort signal. Returns whether this call raised it.
    fn stop(&self) -> bool {
        self.aborted
            .send_if_modified(|aborted| !std::mem::replace(aborted, true))
    }

    /// Terminate whatever is in flight. The task awaiting it observes the
    /// signal and emits `close`, so this never reports an error.
    pub(crate) fn abort(&self) -> bool {
        if !self.stop() {
            return false;
        }
        debug!(transport = self.name, uri = %self.uri, "aborting");
        // Never connected: nothing in flight will settle and close for us.
        if self.outbound_rx.lock().is_some() {
            self.emitter.close();
        }
        true
    }

    pub(crate) fn close(self: &Arc<Self>) {
        if !self.abort() {
            return;
        }
        let Some(id) = self.id() else {
            return;
        };
        if self.abort_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        let url = self.url_with(&[("when", "abort"), ("id", &id)]);
        let client = self.client.clone();
        let name = self.name;
        tokio::spawn(async move {
            if let Err(err) = client.get(url).send().await {
                debug!(transport = name, "abort notice failed: {err}");
            }
        });
    }

    /// Stop outstanding work and emit the single `close`.
    pub(crate) fn finish(&self) {
        self.stop();
        if self.emitter.close() {
            debug!(transport = self.name, uri = %self.uri, "closed");
        }
    }

    pub(crate) fn fail(&self, error: TransportError) {
        warn!(transport = self.name, uri = %self.uri, "transport failed: {error}");
        self.emitter.error(error);
        self.finish();
    }

    /// Report a peer that broke the framing rules and close on it.
    pub(crate) fn protocol_failure(self: &Arc<Self>, error: ProtocolError) {
        warn!(transport = self.name, uri = %self.uri, "protocol error: {error}");
        self.emitter.error(error.into());
        self.close();
    }

    pub(crate) async fn get(&self, params: &[(&str, &str)]) -> Result<reqwest::Response, TransportError> {
        let response = self.client.get(self.url_with(params)).send().await?;
        check_status(response)
    }

    /// Issue a GET on its own task and buffer the whole body.
    ///
    /// The request is in flight as soon as this returns, whether or not
    /// anyone awaits the handle yet.
    pub(crate) fn spawn_exchange(
        self: &Arc<Self>,
        params: Vec<(&'static str, String)>,
    ) -> JoinHandle<Result<Exchange, TransportError>> {
        let base = Arc::clone(self);
        tokio::spawn(async move {
            let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
            let response = base.get(&pairs).await?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?;
            Ok(Exchange { content_type, body })
        })
    }

    async fn post(&self, id: &str, payload: Payload) -> Result<(), TransportError> {
        let (content_type, body) = match payload {
            Payload::Text(text) => (TEXT_CONTENT_TYPE, Bytes::from(text)),
            Payload::Binary(bytes) => (BINARY_CONTENT_TYPE, bytes),
        };
        let response = self
            .client
            .post(self.url_with(&[("id", id)]))
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        check_status(response).map(drop)
    }
}

/// Wait for `request` unless the transport is aborted first.
pub(crate) async fn settle<T>(
    mut request: JoinHandle<Result<T, TransportError>>,
    aborted: &mut AbortSignal,
) -> Settled<T> {
    tokio::select! {
        biased;
        () = aborted.fired() => {
            request.abort();
            Settled::Aborted
        }
        joined = &mut request => match joined {
            Ok(Ok(value)) => Settled::Done(value),
            Ok(Err(err)) => Settled::Failed(err),
            Err(err) => {
                warn!("request task ended abnormally: {err}");
                Settled::Aborted
            }
        },
    }
}

/// Post queued payloads one at a time once the handshake assigned an id.
async fn write_loop(base: Arc<HttpBase>, mut outbound: mpsc::UnboundedReceiver<Payload>) {
    let mut aborted = base.abort_signal();
    let mut assigned = base.id.subscribe();

    let id = tokio::select! {
        biased;
        () = aborted.fired() => return,
        id = assigned.wait_for(Option::is_some) => match id {
            Ok(id) => id.clone(),
            Err(_) => return,
        },
    };
    let Some(id) = id else {
        return;
    };

    loop {
        let payload = tokio::select! {
            biased;
            () = aborted.fired() => break,
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        let sent = tokio::select! {
            biased;
            () = aborted.fired() => break,
            sent = base.post(&id, payload) => sent,
        };
        if let Err(err) = sent {
            base.fail(err);
            break;
        }
    }
    trace!(transport = base.name, "writer stopped");
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

/// Accept only `http(s)` URIs whose `transport` parameter names `transport`.
pub(crate) fn validate_uri(uri: &str, transport: &'static str) -> Result<Url, TransportError> {
    let url = Url::parse(uri)?;
    let scheme_ok = matches!(url.scheme(), "http" | "https");
    let transport_ok = url
        .query_pairs()
        .any(|(name, value)| name == TRANSPORT_PARAM && value == transport);
    if scheme_ok && transport_ok {
        Ok(url)
    } else {
        Err(TransportError::UnsupportedUri {
            uri: uri.to_string(),
            expected: transport,
        })
    }
}
