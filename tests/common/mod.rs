//! In-process HTTP peer for end-to-end tests.
//!
//! Serves both HTTP transports on `/vibe`:
//!
//! ```text
//! GET  ?transport=longpoll&when=open   -> "?id=<id>"
//! GET  ?transport=longpoll&when=poll   -> one queued message, or "" once closed
//! GET  ?transport=stream&when=open     -> padding, "data: ?id=<id>\n\n", then records
//! GET  ?...&when=abort&id=<id>         -> ends the session
//! POST ?...&id=<id>                    -> first body is the handshake, then events
//! ```
//!
//! Inbound events drive a small scripted application: `echo` is echoed,
//! `abort` ends the session, `/reply/inbound` is answered and
//! `/reply/outbound` makes the peer ask the client for a reply.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use vibe_protocol::{Event, EventNames, Handshake, ReplyEnvelope};

pub const TEXT: &str = "text/plain; charset=utf-8";
pub const PADDING: usize = 2048;

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

enum Outbound {
    Text(String),
    Raw { content_type: String, body: Bytes },
    Close,
}

/// A POST body as the peer received it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub content_type: String,
    pub body: Bytes,
}

/// One client connection as seen by the peer.
pub struct Session {
    pub id: String,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Outbound>>,
    closed: AtomicBool,
    aborted: AtomicBool,
    inbound: Mutex<Vec<Inbound>>,
    events: Mutex<Vec<Event>>,
    awaiting_reply: Mutex<HashSet<String>>,
    next_event_id: AtomicU64,
}

impl Session {
    fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            closed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            inbound: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            awaiting_reply: Mutex::new(HashSet::new()),
            next_event_id: AtomicU64::new(0),
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.outbound_tx.send(Outbound::Text(text.into()));
    }

    /// Queue a long-poll response with an arbitrary content type.
    pub fn push_raw(&self, content_type: &str, body: impl Into<Bytes>) {
        let _ = self.outbound_tx.send(Outbound::Raw {
            content_type: content_type.to_string(),
            body: body.into(),
        });
    }

    /// Send an application event; returns its id.
    pub fn push_event(&self, event_type: &str, data: Value, reply: bool) -> String {
        let id = format!("p{}", self.next_event_id.fetch_add(1, Ordering::Relaxed));
        if reply {
            self.awaiting_reply.lock().insert(id.clone());
        }
        let text = Event::new(id.clone(), event_type, data, reply)
            .to_json()
            .expect("peer event encodes");
        self.push_text(text);
        id
    }

    /// End the session from the peer side.
    pub fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn inbound(&self) -> Vec<Inbound> {
        self.inbound.lock().clone()
    }

    /// The liveness parameters the client announced in its first body.
    pub fn handshake(&self) -> Option<Handshake> {
        let inbound = self.inbound.lock();
        let first = inbound.first()?;
        Handshake::decode(&String::from_utf8_lossy(&first.body)).ok()
    }

    pub fn raw_handshake(&self) -> Option<String> {
        let inbound = self.inbound.lock();
        let first = inbound.first()?;
        Some(String::from_utf8_lossy(&first.body).into_owned())
    }

    /// Events received after the handshake.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }

    async fn next_outbound(&self) -> Option<Outbound> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let item = self.outbound_rx.lock().await.recv().await;
        match item {
            Some(Outbound::Close) | None => {
                self.closed.store(true, Ordering::SeqCst);
                None
            }
            other => other,
        }
    }

    fn receive(&self, content_type: String, body: Bytes) {
        let first = {
            let mut inbound = self.inbound.lock();
            inbound.push(Inbound {
                content_type: content_type.clone(),
                body: body.clone(),
            });
            inbound.len() == 1
        };
        if first || !content_type.starts_with("text/plain") {
            return;
        }
        let Ok(event) = Event::parse(&String::from_utf8_lossy(&body)) else {
            return;
        };
        self.events.lock().push(event.clone());
        self.on_event(event);
    }

    fn on_event(&self, event: Event) {
        match event.event_type.as_str() {
            "echo" => {
                self.push_event("echo", event.data, false);
            }
            "abort" => self.close(),
            "/reply/inbound" => {
                let rejected = event.data["type"] == "rejected";
                let envelope = ReplyEnvelope {
                    id: event.id,
                    data: event.data["data"].clone(),
                    exception: rejected,
                };
                self.push_event(EventNames::REPLY, envelope.into_value(), false);
            }
            "/reply/outbound" => {
                self.push_event("test", event.data, true);
            }
            EventNames::REPLY => {
                let Ok(envelope) = ReplyEnvelope::from_value(event.data) else {
                    return;
                };
                if self.awaiting_reply.lock().remove(&envelope.id) {
                    let done = json!({ "exception": envelope.exception, "data": envelope.data });
                    self.push_event("done", done, false);
                }
            }
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PeerState {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl PeerState {
    fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions
            .lock()
            .insert(session.id.clone(), Arc::clone(&session));
        session
    }

    fn find(&self, params: &HashMap<String, String>) -> Option<Arc<Session>> {
        let id = params.get("id")?;
        self.sessions.lock().get(id).cloned()
    }
}

pub struct Peer {
    addr: SocketAddr,
    state: Arc<PeerState>,
}

impl Peer {
    pub async fn start() -> Self {
        let state = Arc::new(PeerState::default());
        let app = Router::new()
            .route("/vibe", get(on_get).post(on_post))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind peer");
        let addr = listener.local_addr().expect("peer address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state }
    }

    pub fn uri(&self, transport: &str) -> String {
        format!("http://{}/vibe?transport={transport}", self.addr)
    }

    /// The one session this peer has accepted.
    pub async fn session(&self) -> Arc<Session> {
        wait_until("a session", || !self.state.sessions.lock().is_empty()).await;
        let sessions = self.state.sessions.lock();
        assert_eq!(sessions.len(), 1, "expected a single session");
        sessions.values().next().cloned().expect("session")
    }
}

async fn on_get(State(state): State<Arc<PeerState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let transport = params.get("transport").map(String::as_str).unwrap_or_default();
    match (params.get("when").map(String::as_str), transport) {
        (Some("open"), "longpoll") => {
            let session = state.create();
            text_response(format!("?id={}", session.id))
        }
        (Some("open"), "stream") => open_stream(state.create()),
        (Some("poll"), _) => match state.find(&params) {
            Some(session) => poll(session).await,
            None => StatusCode::NOT_FOUND.into_response(),
        },
        (Some("abort"), _) => {
            if let Some(session) = state.find(&params) {
                session.aborted.store(true, Ordering::SeqCst);
                session.close();
            }
            StatusCode::OK.into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn on_post(
    State(state): State<Arc<PeerState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(session) = state.find(&params) else {
        return StatusCode::NOT_FOUND;
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    session.receive(content_type, body);
    StatusCode::OK
}

async fn poll(session: Arc<Session>) -> Response {
    match session.next_outbound().await {
        Some(Outbound::Text(text)) => text_response(text),
        Some(Outbound::Raw { content_type, body }) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Some(Outbound::Close) | None => text_response(String::new()),
    }
}

fn open_stream(session: Arc<Session>) -> Response {
    let head = stream::iter([
        Ok::<_, Infallible>(Bytes::from(" ".repeat(PADDING) + "\n")),
        Ok(Bytes::from(format!("data: ?id={}\n\n", session.id))),
    ]);
    let records = stream::unfold(session, |session| async move {
        let record = match session.next_outbound().await? {
            Outbound::Text(text) => format!("data: {text}\n\n"),
            Outbound::Raw { body, .. } => format!("data: {}\n\n", String::from_utf8_lossy(&body)),
            Outbound::Close => return None,
        };
        Some((Ok(Bytes::from(record)), session))
    });
    ([(header::CONTENT_TYPE, TEXT)], Body::from_stream(head.chain(records))).into_response()
}

fn text_response(text: String) -> Response {
    ([(header::CONTENT_TYPE, TEXT)], text).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting
// ─────────────────────────────────────────────────────────────────────────────

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
