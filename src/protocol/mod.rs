//! Protocol decoder contract.
//!
//! One decoder per hardware family. The transport hands a decoder exactly
//! one complete frame per call; the decoder identifies the device (or reuses
//! the session binding), parses fields, and returns zero or more normalized
//! positions. Acknowledgements are queued on the connection as a side
//! effect. Decoders hold no per-connection state of their own, so a single
//! decoder instance serves every connection of its protocol.

pub mod jt600;
pub mod mtx;
pub mod osmand;
pub mod tk103;
pub mod v680;

use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::position::Position;
use crate::registry::DeviceRegistry;
use crate::session::Connection;

pub use jt600::Jt600Decoder;
pub use mtx::MtxDecoder;
pub use osmand::OsmAndDecoder;
pub use tk103::Tk103Decoder;
pub use v680::V680Decoder;

/// One complete message as delivered by the transport collaborator.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A delimited text line.
    Text(String),
    /// A raw byte buffer for binary-framed protocols.
    Binary(Bytes),
    /// An already-parsed HTTP request.
    Http(HttpFrame),
}

impl Frame {
    pub fn text(message: impl Into<String>) -> Self {
        Frame::Text(message.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }
}

/// The parts of an HTTP request a decoder needs: the raw query string and
/// the body. The transport layer answers the request itself.
#[derive(Debug, Clone, Default)]
pub struct HttpFrame {
    pub query: String,
    pub body: String,
}

/// Contract implemented by every protocol decoder.
///
/// `decode` must never fail the connection: a frame the grammar does not
/// recognize or a device that cannot be identified yields `Ok(vec![])`. An
/// `Err` signals a malformed required field inside a recognized frame; the
/// dispatcher logs and drops it without disturbing the connection.
pub trait ProtocolDecoder: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    fn registry(&self) -> &DeviceRegistry;

    fn decode(&self, connection: &mut Connection, frame: &Frame) -> Result<Vec<Position>>;

    /// Resolve a protocol-level identifier and bind it to the connection.
    /// Re-identifying with the same identifier later is harmless. Failure is
    /// not an error: the frame is dropped but the connection stays open and
    /// the next frame gets another attempt.
    fn identify(&self, identifier: &str, connection: &mut Connection) -> bool {
        match self.registry().resolve(identifier) {
            Some(device_id) => {
                connection.session.bind(device_id);
                true
            }
            None => {
                debug!(
                    protocol = self.protocol_name(),
                    identifier, "unknown device identifier"
                );
                metrics::counter!("decoder.identify.unknown", "protocol" => self.protocol_name())
                    .increment(1);
                false
            }
        }
    }
}

/// Instantiate the decoder for a configured protocol name.
pub fn create_decoder(
    name: &str,
    registry: Arc<DeviceRegistry>,
) -> Option<Arc<dyn ProtocolDecoder>> {
    match name {
        "mtx" => Some(Arc::new(MtxDecoder::new(registry))),
        "tk103" => Some(Arc::new(Tk103Decoder::new(registry))),
        "v680" => Some(Arc::new(V680Decoder::new(registry))),
        "jt600" => Some(Arc::new(Jt600Decoder::new(registry))),
        "osmand" => Some(Arc::new(OsmAndDecoder::new(registry))),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use uuid::Uuid;

    /// Registry preloaded with the identifiers used by the decoder fixtures.
    pub fn fixture_registry(identifiers: &[&str]) -> (Arc<DeviceRegistry>, Vec<Uuid>) {
        let registry = Arc::new(DeviceRegistry::new());
        let ids: Vec<Uuid> = identifiers
            .iter()
            .map(|identifier| {
                let id = Uuid::new_v4();
                registry.insert(*identifier, id);
                id
            })
            .collect();
        (registry, ids)
    }

    /// Connection with an inspectable reply channel.
    pub fn test_connection() -> (Connection, flume::Receiver<Vec<u8>>) {
        let (tx, rx) = flume::unbounded();
        (Connection::new(None, Some(tx)), rx)
    }
}
