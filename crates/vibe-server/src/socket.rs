//! The protocol-level socket.
//!
//! Flow for one socket:
//!   1. `Socket::new` writes the handshake (`?heartbeat=..&_heartbeat=..`)
//!      and arms the heartbeat timer
//!   2. A driver task turns transport notifications into [`SocketEvent`]s
//!   3. Inbound `heartbeat` rearms the timer and is acknowledged
//!   4. Inbound `reply` settles the matching pending reply
//!   5. Transport `close` (or the timer expiring) ends the socket

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use vibe_protocol::{Event, EventNames, Handshake, ProtocolError, ReplyEnvelope};
use vibe_transport::{Payload, Transport, TransportEvent, TransportEvents};

use crate::error::SocketError;
use crate::heartbeat::{Heartbeat, HeartbeatState};
use crate::reply::{PendingReplies, Reply, ReplyCallbacks, ReplyFuture};

/// An application event received from the peer.
#[derive(Debug, Clone)]
pub struct Message {
    pub event_type: String,
    pub data: Value,
    /// Present when the peer waits for an answer.
    pub reply: Option<Reply>,
}

/// What a socket reports to the application.
///
/// `Error` is always followed by `Close`; `Close` is always the last event.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Open,
    Message(Message),
    Error(SocketError),
    Close,
}

/// One subscriber's view of a socket's events. Ends after `Close`.
pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

/// Handle to a socket. Clones refer to the same socket.
#[derive(Clone)]
pub struct Socket {
    core: Arc<SocketCore>,
}

struct SocketCore {
    transport: Arc<dyn Transport>,
    handshake: Handshake,
    next_event_id: AtomicU64,
    pending: PendingReplies,
    state: Mutex<HeartbeatState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SocketEvent>>>,
}

impl Socket {
    /// Build a socket over `transport` and start driving it.
    ///
    /// The handshake is written before anything else, so it is the first
    /// payload the peer sees. Must be called within a Tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        handshake: Handshake,
    ) -> (Self, SocketEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Self {
            core: Arc::new(SocketCore {
                transport,
                handshake,
                next_event_id: AtomicU64::new(0),
                pending: PendingReplies::default(),
                state: Mutex::new(HeartbeatState::Armed),
                subscribers: Mutex::new(vec![tx]),
            }),
        };

        socket.core.transport.send(Payload::Text(handshake.encode()));
        let heartbeat = Heartbeat::start(handshake.heartbeat);
        tokio::spawn(drive(socket.clone(), events, heartbeat));

        (socket, rx)
    }

    /// Transport id assigned by the peer.
    pub fn id(&self) -> Option<String> {
        self.core.transport.id()
    }

    pub fn uri(&self) -> &str {
        self.core.transport.uri()
    }

    pub fn handshake(&self) -> Handshake {
        self.core.handshake
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        *self.core.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.heartbeat_state() == HeartbeatState::Closed
    }

    /// Another receiver of this socket's events, starting from now.
    pub fn subscribe(&self) -> SocketEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.core.subscribers.lock();
        if !self.is_closed() {
            subscribers.push(tx);
        }
        rx
    }

    /// Fire-and-forget event.
    pub fn send(&self, event_type: impl Into<String>, data: impl Into<Value>) -> &Self {
        self.transmit(event_type.into(), data.into(), None);
        self
    }

    /// Send an event and run one of `callbacks` when the peer replies.
    ///
    /// Empty callbacks send a plain event. Nothing runs if the peer never
    /// replies or the socket closes first.
    pub fn send_with_reply(
        &self,
        event_type: impl Into<String>,
        data: impl Into<Value>,
        callbacks: ReplyCallbacks,
    ) -> &Self {
        let callbacks = (!callbacks.is_empty()).then_some(callbacks);
        self.transmit(event_type.into(), data.into(), callbacks);
        self
    }

    /// Send an event and wait for the peer's reply.
    pub fn request(&self, event_type: impl Into<String>, data: impl Into<Value>) -> ReplyFuture {
        let (callbacks, reply) = ReplyFuture::channel();
        self.transmit(event_type.into(), data.into(), Some(callbacks));
        reply
    }

    /// Close the underlying transport. `Close` follows once it settles.
    pub fn close(&self) -> &Self {
        self.core.transport.close();
        self
    }

    fn transmit(&self, event_type: String, data: Value, callbacks: Option<ReplyCallbacks>) {
        if self.is_closed() {
            debug!(%event_type, "socket closed; dropping event");
            return;
        }
        let id = self.core.next_event_id.fetch_add(1, Ordering::Relaxed).to_string();
        let event = Event::new(id.clone(), event_type, data, callbacks.is_some());
        let text = match event.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(event_type = %event.event_type, "failed to encode event: {err}");
                return;
            }
        };
        if let Some(callbacks) = callbacks {
            self.core.pending.insert(id, callbacks);
        }
        self.core.transport.send(Payload::Text(text));
    }

    fn dispatch(&self, event: SocketEvent) {
        self.core
            .subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, state: HeartbeatState) {
        *self.core.state.lock() = state;
    }

    fn on_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        let event = match Event::parse(text) {
            Ok(event) => event,
            Err(err) => return self.protocol_failure(err),
        };

        if event.event_type == EventNames::HEARTBEAT && self.heartbeat_state() == HeartbeatState::Armed {
            heartbeat.rearm();
            self.send(EventNames::HEARTBEAT, Value::Null);
        }

        if event.is_reply() {
            return self.on_reply(event.data);
        }

        let reply = event.reply.then(|| Reply::new(self.clone(), event.id));
        self.dispatch(SocketEvent::Message(Message {
            event_type: event.event_type,
            data: event.data,
            reply,
        }));
    }

    fn on_reply(&self, data: Value) {
        match ReplyEnvelope::from_value(data) {
            Ok(envelope) => {
                let id = envelope.id.clone();
                if !self.core.pending.settle(envelope) {
                    debug!(%id, "discarding reply to an unknown or answered event");
                }
            }
            Err(err) => self.protocol_failure(err),
        }
    }

    fn protocol_failure(&self, err: ProtocolError) {
        warn!(uri = self.uri(), "protocol error: {err}");
        self.dispatch(SocketEvent::Error(SocketError::Protocol(Arc::new(err))));
        self.close();
    }

    fn on_heartbeat_expired(&self, heartbeat: &Heartbeat) {
        let interval = heartbeat.interval();
        warn!(uri = self.uri(), ?interval, "heartbeat expired");
        self.set_state(HeartbeatState::Expired);
        self.dispatch(SocketEvent::Error(SocketError::HeartbeatTimeout { interval }));
        self.close();
    }

    fn finish(&self) {
        self.set_state(HeartbeatState::Closed);
        let abandoned = self.core.pending.clear();
        self.dispatch(SocketEvent::Close);
        self.core.subscribers.lock().clear();
        debug!(uri = self.uri(), abandoned, "socket closed");
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("uri", &self.uri())
            .field("id", &self.id())
            .field("state", &self.heartbeat_state())
            .finish()
    }
}

async fn drive(socket: Socket, mut events: TransportEvents, mut heartbeat: Heartbeat) {
    loop {
        let armed = socket.heartbeat_state() == HeartbeatState::Armed;
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Open) => {
                    debug!(uri = socket.uri(), id = ?socket.id(), "socket open");
                    socket.dispatch(SocketEvent::Open);
                }
                Some(TransportEvent::Text(text)) => socket.on_text(&text, &mut heartbeat),
                Some(TransportEvent::Binary(bytes)) => {
                    debug!(len = bytes.len(), "ignoring binary payload");
                }
                Some(TransportEvent::Error(err)) => {
                    socket.dispatch(SocketEvent::Error(SocketError::Transport(err)));
                }
                Some(TransportEvent::Close) | None => break,
            },
            () = heartbeat.elapsed(), if armed => socket.on_heartbeat_expired(&heartbeat),
        }
    }
    socket.finish();
}
