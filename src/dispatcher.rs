//! Frame dispatch and the decode error boundary.
//!
//! The transport owns sockets and framing; decoders own parsing. The
//! dispatcher sits between them: it runs the decoder on each complete frame
//! and forwards the resulting positions into the processing channel. A
//! decoder error is logged and counted here and goes no further, so one
//! malformed frame never takes down a connection.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::position::Position;
use crate::protocol::{Frame, ProtocolDecoder};
use crate::session::Connection;

pub struct Dispatcher {
    decoder: Arc<dyn ProtocolDecoder>,
    sink: flume::Sender<Position>,
}

impl Dispatcher {
    pub fn new(decoder: Arc<dyn ProtocolDecoder>, sink: flume::Sender<Position>) -> Self {
        Self { decoder, sink }
    }

    pub fn protocol_name(&self) -> &'static str {
        self.decoder.protocol_name()
    }

    /// Decode one frame and queue whatever positions come out. Backpressure
    /// from the sink suspends the connection's read loop, which is the
    /// intended throttle when downstream falls behind.
    pub async fn dispatch(&self, connection: &mut Connection, frame: &Frame) {
        let protocol = self.decoder.protocol_name();
        metrics::counter!("decoder.frames", "protocol" => protocol).increment(1);

        let positions = match self.decoder.decode(connection, frame) {
            Ok(positions) => positions,
            Err(error) => {
                warn!(protocol, %error, "dropping undecodable frame");
                metrics::counter!("decoder.errors", "protocol" => protocol).increment(1);
                return;
            }
        };

        for position in positions {
            debug!(
                protocol,
                device_id = %position.device_id,
                latitude = position.latitude,
                longitude = position.longitude,
                "decoded position"
            );
            metrics::counter!("decoder.positions", "protocol" => protocol).increment(1);
            if self.sink.send_async(position).await.is_err() {
                warn!(protocol, "position sink closed, dropping decoded positions");
                return;
            }
        }
    }
}
