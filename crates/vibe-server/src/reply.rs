//! Request/reply correlation.
//!
//! Outbound: an event sent with [`ReplyCallbacks`] is remembered by id
//! until the peer's `reply` event arrives; exactly one callback runs and
//! the entry is dropped.
//!
//! Inbound: an event that asks for a reply is delivered with a [`Reply`]
//! handle. The first `resolve` or `reject` sends the `reply` event; every
//! later call is ignored.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;
use vibe_protocol::{EventNames, ReplyEnvelope};

use crate::error::ReplyError;
use crate::socket::Socket;

type Callback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Callbacks for the reply to an outbound event.
#[derive(Default)]
pub struct ReplyCallbacks {
    on_resolve: Option<Callback>,
    on_reject: Option<Callback>,
}

impl ReplyCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resolve(mut self, callback: impl FnOnce(Value) + Send + 'static) -> Self {
        self.on_resolve = Some(Box::new(callback));
        self
    }

    pub fn on_reject(mut self, callback: impl FnOnce(Value) + Send + 'static) -> Self {
        self.on_reject = Some(Box::new(callback));
        self
    }

    /// No callback at all: the event is sent without asking for a reply.
    pub fn is_empty(&self) -> bool {
        self.on_resolve.is_none() && self.on_reject.is_none()
    }

    fn invoke(self, exception: bool, data: Value) {
        let callback = if exception { self.on_reject } else { self.on_resolve };
        if let Some(callback) = callback {
            callback(data);
        }
    }
}

impl fmt::Debug for ReplyCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyCallbacks")
            .field("on_resolve", &self.on_resolve.is_some())
            .field("on_reject", &self.on_reject.is_some())
            .finish()
    }
}

/// Outbound events still waiting for their reply, keyed by event id.
#[derive(Default)]
pub(crate) struct PendingReplies {
    entries: Mutex<HashMap<String, ReplyCallbacks>>,
}

impl PendingReplies {
    pub(crate) fn insert(&self, id: String, callbacks: ReplyCallbacks) {
        self.entries.lock().insert(id, callbacks);
    }

    /// Run the callback matching `envelope` and forget the entry.
    /// Returns false when no entry was waiting.
    pub(crate) fn settle(&self, envelope: ReplyEnvelope) -> bool {
        let Some(callbacks) = self.entries.lock().remove(&envelope.id) else {
            return false;
        };
        callbacks.invoke(envelope.exception, envelope.data);
        true
    }

    /// Drop every entry without running callbacks. Returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }
}

/// Progress of an inbound reply-requiring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Pending,
    Resolved,
    Rejected,
}

/// Answers one inbound event that asked for a reply.
///
/// Clones share the latch.
#[derive(Debug, Clone)]
pub struct Reply {
    inner: Arc<ReplyInner>,
}

#[derive(Debug)]
struct ReplyInner {
    socket: Socket,
    event_id: String,
    latch: Mutex<LatchState>,
}

impl Reply {
    pub(crate) fn new(socket: Socket, event_id: String) -> Self {
        Self {
            inner: Arc::new(ReplyInner {
                socket,
                event_id,
                latch: Mutex::new(LatchState::Pending),
            }),
        }
    }

    /// Id of the event being answered.
    pub fn event_id(&self) -> &str {
        &self.inner.event_id
    }

    pub fn state(&self) -> LatchState {
        *self.inner.latch.lock()
    }

    /// Answer successfully. Returns false if the event was already answered.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.settle(LatchState::Resolved, value.into())
    }

    /// Answer with an exception. Returns false if the event was already answered.
    pub fn reject(&self, value: impl Into<Value>) -> bool {
        self.settle(LatchState::Rejected, value.into())
    }

    fn settle(&self, outcome: LatchState, value: Value) -> bool {
        {
            let mut latch = self.inner.latch.lock();
            if *latch != LatchState::Pending {
                trace!(event_id = %self.inner.event_id, "already answered");
                return false;
            }
            *latch = outcome;
        }
        let envelope = ReplyEnvelope {
            id: self.inner.event_id.clone(),
            data: value,
            exception: outcome == LatchState::Rejected,
        };
        self.inner.socket.send(EventNames::REPLY, envelope.into_value());
        true
    }
}

/// The peer's answer to [`Socket::request`](crate::Socket::request).
#[derive(Debug)]
pub struct ReplyFuture {
    rx: oneshot::Receiver<Result<Value, Value>>,
}

impl ReplyFuture {
    /// Callbacks that complete the returned future.
    pub(crate) fn channel() -> (ReplyCallbacks, Self) {
        let (tx, rx) = oneshot::channel();
        let resolved = Arc::new(Mutex::new(Some(tx)));
        let rejected = Arc::clone(&resolved);
        let callbacks = ReplyCallbacks::new()
            .on_resolve(move |value| {
                if let Some(tx) = resolved.lock().take() {
                    let _ = tx.send(Ok(value));
                }
            })
            .on_reject(move |value| {
                if let Some(tx) = rejected.lock().take() {
                    let _ = tx.send(Err(value));
                }
            });
        (callbacks, Self { rx })
    }
}

impl Future for ReplyFuture {
    type Output = Result<Value, ReplyError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|outcome| match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(value)) => Err(ReplyError::Rejected(value)),
            // Callbacks dropped unanswered: the socket closed.
            Err(_) => Err(ReplyError::Closed),
        })
    }
}
