//! Heartbeat timer.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Liveness state of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Waiting for the next heartbeat.
    Armed,
    /// The interval passed without one; the socket is closing.
    Expired,
    Closed,
}

/// The single timer of a socket. Rearmed, never paused.
pub(crate) struct Heartbeat {
    interval: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl Heartbeat {
    pub(crate) fn start(interval: Duration) -> Self {
        Self {
            interval,
            sleep: Box::pin(tokio::time::sleep(interval)),
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Replace the running deadline with a full interval from now.
    pub(crate) fn rearm(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.interval);
    }

    pub(crate) async fn elapsed(&mut self) {
        self.sleep.as_mut().await;
    }
}
