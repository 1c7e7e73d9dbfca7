//! Per-connection session state.
//!
//! A [`Session`] binds a transport connection to a resolved device identity.
//! Stateful protocols identify once and rely on the binding for the rest of
//! the connection; stateless protocols re-identify on every frame, which
//! rebinds harmlessly. The session is owned by the connection handler and
//! passed with every decode call; it dies with the connection, so no
//! binding survives a disconnect.

use std::net::SocketAddr;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct Session {
    device_id: Option<Uuid>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the resolved device id to this connection. Idempotent.
    pub fn bind(&mut self, device_id: Uuid) {
        self.device_id = Some(device_id);
    }

    pub fn device_id(&self) -> Option<Uuid> {
        self.device_id
    }

    pub fn is_bound(&self) -> bool {
        self.device_id.is_some()
    }
}

/// Decoder-facing view of one transport connection: remote address, the
/// session, and an outbound channel for acknowledgement frames. The channel
/// is drained by the connection's writer task, so a decode call never blocks
/// on network I/O.
#[derive(Debug)]
pub struct Connection {
    pub remote: Option<SocketAddr>,
    pub session: Session,
    outbound: Option<flume::Sender<Vec<u8>>>,
}

impl Connection {
    pub fn new(remote: Option<SocketAddr>, outbound: Option<flume::Sender<Vec<u8>>>) -> Self {
        Self {
            remote,
            session: Session::new(),
            outbound,
        }
    }

    /// A connection with no reply path and no session continuity, used for
    /// request/response transports where the response is written by the
    /// HTTP layer.
    pub fn stateless() -> Self {
        Self::new(None, None)
    }

    /// Queue an acknowledgement to be written back on this connection.
    /// Best effort: a full or closed channel drops the reply, which only
    /// happens while the connection is being torn down anyway.
    pub fn send(&self, data: impl Into<Vec<u8>>) {
        if let Some(outbound) = &self.outbound {
            if outbound.try_send(data.into()).is_err() {
                debug!(remote = ?self.remote, "acknowledgement dropped, connection closing");
                metrics::counter!("server.ack.dropped").increment(1);
            }
        }
    }
}
