//! The transport contract.
//!
//! Operations return immediately. Their outcome arrives later on the
//! transport's [`TransportEvents`] channel.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TransportError;

/// An outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

/// What a transport reports to its owner.
///
/// `Close` is delivered at most once and is always the last event.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Text(String),
    Binary(Bytes),
    Error(Arc<TransportError>),
    Close,
}

/// Receiving side of a transport's notifications.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One physical connection medium.
///
/// Implementations spawn onto the ambient Tokio runtime, so `connect`,
/// `send` and `close` must be called from within one.
pub trait Transport: Send + Sync + 'static {
    /// The URI this transport was created for.
    fn uri(&self) -> &str;

    /// Id assigned by the peer's handshake, `None` until `open`.
    fn id(&self) -> Option<String>;

    /// Start the exchange. Calling it twice has no effect.
    fn connect(&self);

    /// Queue a payload for the peer. Payloads keep their order.
    fn send(&self, payload: Payload);

    /// Forcibly end the in-flight exchange. Yields exactly one `close`.
    fn abort(&self);

    /// Abort and tell the peer the close was intentional.
    fn close(&self);
}

/// Sending side of [`TransportEvents`] that enforces the single `close`.
#[derive(Debug)]
pub(crate) struct Emitter {
    tx: mpsc::UnboundedSender<TransportEvent>,
    /// Held across the send so nothing can slip in behind `Close`.
    closed: Mutex<bool>,
}

impl Emitter {
    pub(crate) fn new() -> (Self, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx,
            closed: Mutex::new(false),
        };
        (emitter, rx)
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if matches!(event, TransportEvent::Close) {
            self.close();
            return;
        }
        let closed = self.closed.lock();
        if *closed {
            trace!("dropping {event:?} after close");
            return;
        }
        // The owner may have gone away; nothing left to notify then.
        let _ = self.tx.send(event);
    }

    pub(crate) fn error(&self, error: TransportError) {
        self.emit(TransportEvent::Error(Arc::new(error)));
    }

    /// Emit `close` unless it was already emitted. Returns whether it was.
    pub(crate) fn close(&self) -> bool {
        let mut closed = self.closed.lock();
        if std::mem::replace(&mut *closed, true) {
            return false;
        }
        let _ = self.tx.send(TransportEvent::Close);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_closes_once_and_goes_quiet() {
        let (emitter, mut rx) = Emitter::new();
        emitter.emit(TransportEvent::Open);
        assert!(emitter.close());
        assert!(!emitter.close());
        emitter.emit(TransportEvent::Text("late".into()));
        emitter.emit(TransportEvent::Close);

        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Open)));
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_stays_last_under_concurrent_emits() {
        for _ in 0..50 {
            let (emitter, mut rx) = Emitter::new();
            let emitter = Arc::new(emitter);
            let senders: Vec<_> = (0..4)
                .map(|n| {
                    let emitter = Arc::clone(&emitter);
                    std::thread::spawn(move || {
                        for i in 0..200 {
                            emitter.emit(TransportEvent::Text(format!("{n}-{i}")));
                        }
                    })
                })
                .collect();
            let closer = {
                let emitter = Arc::clone(&emitter);
                std::thread::spawn(move || emitter.close())
            };
            for sender in senders {
                sender.join().unwrap();
            }
            assert!(closer.join().unwrap());

            let mut seen_close = false;
            while let Ok(event) = rx.try_recv() {
                assert!(!seen_close, "{event:?} arrived after close");
                seen_close = matches!(event, TransportEvent::Close);
            }
            assert!(seen_close);
        }
    }
}
