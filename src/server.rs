//! TCP transport: listeners, per-connection read loops, and framing.
//!
//! One listener per configured protocol. Each accepted socket gets its own
//! task that accumulates bytes, cuts complete frames according to the
//! protocol's framing rule, and hands them to the dispatcher. A small writer
//! task per connection drains queued acknowledgements so the read loop never
//! blocks on the peer's receive window.

use anyhow::{Context, Result, bail};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::position::Position;
use crate::protocol::{Frame, ProtocolDecoder};
use crate::session::Connection;

/// Upper bound on unframed buffered bytes before a connection is dropped.
const MAX_BUFFER: usize = 8192;

/// Queue depth for outbound acknowledgements per connection.
const ACK_QUEUE_SIZE: usize = 16;

/// How a protocol delimits messages on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-terminated text.
    Lines,
    /// `(`..`)` framed text, tolerating garbage between frames.
    Brackets,
    /// JT600 mixed framing: `$` binary frames with an embedded length, or
    /// bracket-framed text.
    Jt600,
}

impl Framing {
    pub fn for_protocol(protocol: &str) -> Framing {
        match protocol {
            "tk103" => Framing::Brackets,
            "jt600" => Framing::Jt600,
            _ => Framing::Lines,
        }
    }

    /// Cut the next complete frame off the front of `buffer`, or return
    /// `None` when more bytes are needed.
    fn extract(&self, buffer: &mut BytesMut) -> Result<Option<Frame>> {
        match self {
            Framing::Lines => loop {
                let Some(end) = buffer.iter().position(|&b| b == b'\n') else {
                    return Ok(None);
                };
                let line = buffer.split_to(end + 1);
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(Some(Frame::text(text)));
                }
            },
            Framing::Brackets => extract_bracketed(buffer),
            Framing::Jt600 => match buffer.first() {
                Some(&b'$') => {
                    if buffer.len() < 9 {
                        return Ok(None);
                    }
                    let length = usize::from(u16::from_be_bytes([buffer[7], buffer[8]]));
                    let total = 9 + length + 1;
                    if total > MAX_BUFFER {
                        bail!("binary frame length {length} out of range");
                    }
                    if buffer.len() < total {
                        return Ok(None);
                    }
                    Ok(Some(Frame::Binary(buffer.split_to(total).freeze())))
                }
                Some(&b'(') => extract_bracketed(buffer),
                Some(_) => {
                    // Resync on noise between frames.
                    buffer.advance(1);
                    self.extract(buffer)
                }
                None => Ok(None),
            },
        }
    }
}

fn extract_bracketed(buffer: &mut BytesMut) -> Result<Option<Frame>> {
    let Some(start) = buffer.iter().position(|&b| b == b'(') else {
        buffer.clear();
        return Ok(None);
    };
    buffer.advance(start);
    let Some(end) = buffer.iter().position(|&b| b == b')') else {
        return Ok(None);
    };
    let frame = buffer.split_to(end + 1);
    Ok(Some(Frame::text(
        String::from_utf8_lossy(&frame).into_owned(),
    )))
}

/// Bind and run one protocol listener. Runs until the shutdown channel
/// fires; live connections are dropped with the runtime.
pub async fn run_server(
    bind: SocketAddr,
    decoder: Arc<dyn ProtocolDecoder>,
    sink: flume::Sender<Position>,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {} listener on {bind}", decoder.protocol_name()))?;
    serve_listener(listener, decoder, sink, shutdown).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    decoder: Arc<dyn ProtocolDecoder>,
    sink: flume::Sender<Position>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let protocol = decoder.protocol_name();
    let framing = Framing::for_protocol(protocol);
    let local = listener.local_addr().context("listener local address")?;
    info!(protocol, %local, "listening");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(protocol, "listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, remote) = accepted.context("accept failed")?;
                metrics::counter!("server.connections", "protocol" => protocol).increment(1);
                debug!(protocol, %remote, "connection accepted");
                let dispatcher = Dispatcher::new(decoder.clone(), sink.clone());
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(stream, remote, framing, dispatcher).await {
                        debug!(%remote, %error, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    framing: Framing,
    dispatcher: Dispatcher,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let (ack_tx, ack_rx) = flume::bounded::<Vec<u8>>(ACK_QUEUE_SIZE);
    let writer_task = tokio::spawn(async move {
        while let Ok(data) = ack_rx.recv_async().await {
            if let Err(error) = writer.write_all(&data).await {
                debug!(%error, "acknowledgement write failed");
                break;
            }
        }
    });

    let mut connection = Connection::new(Some(remote), Some(ack_tx));
    let mut buffer = BytesMut::with_capacity(1024);

    loop {
        let read = reader.read_buf(&mut buffer).await?;
        if read == 0 {
            break;
        }
        while let Some(frame) = framing.extract(&mut buffer)? {
            dispatcher.dispatch(&mut connection, &frame).await;
        }
        if buffer.len() > MAX_BUFFER {
            warn!(%remote, buffered = buffer.len(), "dropping connection, no frame boundary found");
            bail!("unframed buffer limit exceeded");
        }
    }

    // Dropping the connection closes the ack queue, letting the writer
    // task drain and exit.
    drop(connection);
    let _ = writer_task.await;
    debug!(%remote, "connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn lines_framing_waits_for_newline() {
        let framing = Framing::Lines;
        let mut buffer = buf(b"#MTX,partial");
        assert!(framing.extract(&mut buffer).unwrap().is_none());

        let mut buffer = buf(b"first\r\nsecond\n");
        match framing.extract(&mut buffer).unwrap() {
            Some(Frame::Text(text)) => assert_eq!(text, "first"),
            other => panic!("unexpected frame: {other:?}"),
        }
        match framing.extract(&mut buffer).unwrap() {
            Some(Frame::Text(text)) => assert_eq!(text, "second"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn lines_framing_skips_blank_lines() {
        let framing = Framing::Lines;
        let mut buffer = buf(b"\r\n\nhello\n");
        match framing.extract(&mut buffer).unwrap() {
            Some(Frame::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn bracket_framing_spans_chunks() {
        let framing = Framing::Brackets;
        let mut buffer = buf(b"junk(0123BR00");
        assert!(framing.extract(&mut buffer).unwrap().is_none());
        buffer.extend_from_slice(b"rest)(next");
        match framing.extract(&mut buffer).unwrap() {
            Some(Frame::Text(text)) => assert_eq!(text, "(0123BR00rest)"),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(framing.extract(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], b"(next");
    }

    #[test]
    fn jt600_binary_framing_uses_embedded_length() {
        let framing = Framing::Jt600;
        let frame_bytes = hex::decode(
            "24 3120820029 11 001B 171012 052831 24381012 02553364 25 00 19 07 19 0003FD2B91044D1FA0"
                .replace(' ', ""),
        )
        .unwrap();

        let mut buffer = buf(&frame_bytes[..12]);
        assert!(framing.extract(&mut buffer).unwrap().is_none());
        buffer.extend_from_slice(&frame_bytes[12..]);
        match framing.extract(&mut buffer).unwrap() {
            Some(Frame::Binary(data)) => assert_eq!(data.len(), 37),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn jt600_text_frames_still_work() {
        let framing = Framing::Jt600;
        let mut buffer = buf(b"(3110312099,W01,rest)");
        match framing.extract(&mut buffer).unwrap() {
            Some(Frame::Text(text)) => assert_eq!(text, "(3110312099,W01,rest)"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn oversized_binary_length_is_rejected() {
        let framing = Framing::Jt600;
        let mut buffer = buf(b"$\x00\x00\x00\x00\x00\x00\xff\xff");
        assert!(framing.extract(&mut buffer).is_err());
    }

    #[test]
    fn framing_defaults_by_protocol() {
        assert_eq!(Framing::for_protocol("mtx"), Framing::Lines);
        assert_eq!(Framing::for_protocol("v680"), Framing::Lines);
        assert_eq!(Framing::for_protocol("tk103"), Framing::Brackets);
        assert_eq!(Framing::for_protocol("jt600"), Framing::Jt600);
    }
}
