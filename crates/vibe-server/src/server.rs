//! Socket factory.
//!
//! Whatever accepts transports (a client connector, the `vibe-probe` binary, a
//! test harness) hands each one to [`ServerFactory::handle`]. The factory
//! wraps it in a [`Socket`] configured with the current settings and
//! publishes it to the application.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};
use vibe_protocol::Handshake;
use vibe_transport::{Transport, TransportEvents};

use crate::socket::{Socket, SocketEvents};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Protocol-wide socket settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Expected interval between peer heartbeats.
    pub heartbeat: Duration,
    /// Announced to the peer as `_heartbeat`.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(20),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn handshake(&self) -> Handshake {
        Handshake::new(self.heartbeat, self.handshake_timeout)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// A socket published by the factory together with its first event receiver.
#[derive(Debug)]
pub struct Accepted {
    pub socket: Socket,
    pub events: SocketEvents,
}

/// Creates sockets from transports and publishes them.
///
/// Settings changed after a socket was created do not affect it.
#[derive(Clone)]
pub struct ServerFactory {
    config: Arc<RwLock<ServerConfig>>,
    socket_tx: mpsc::UnboundedSender<Accepted>,
}

impl ServerFactory {
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<Accepted>) {
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let factory = Self {
            config: Arc::new(RwLock::new(config)),
            socket_tx,
        };
        (factory, socket_rx)
    }

    pub fn config(&self) -> ServerConfig {
        *self.config.read()
    }

    pub fn set_heartbeat(&self, heartbeat: Duration) -> &Self {
        self.config.write().heartbeat = heartbeat;
        self
    }

    pub fn set_handshake_timeout(&self, handshake_timeout: Duration) -> &Self {
        self.config.write().handshake_timeout = handshake_timeout;
        self
    }

    /// Wrap `transport` in a socket and publish it.
    ///
    /// The handshake is queued on the transport immediately; call
    /// `connect` on the transport afterwards. If nobody receives accepted
    /// sockets the new socket is closed.
    pub fn handle(&self, transport: Arc<dyn Transport>, events: TransportEvents) -> Socket {
        let handshake = self.config().handshake();
        let (socket, socket_events) = Socket::new(transport, events, handshake);
        info!(uri = socket.uri(), heartbeat = ?handshake.heartbeat, "socket created");

        let accepted = Accepted {
            socket: socket.clone(),
            events: socket_events,
        };
        if self.socket_tx.send(accepted).is_err() {
            warn!(uri = socket.uri(), "no listener for new sockets; closing");
            socket.close();
        }
        socket
    }
}
