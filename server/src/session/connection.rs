//! Individual peer session handling

use relay_shared::{
    codec::{FrameDecoder, FrameEncoder},
    Event,
};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Relay-assigned identity of one transport session. Never reused.
pub type SessionId = u64;

/// The transport for this session has gone away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClosed;

/// Handle to send events to a specific peer
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub peer_id: String,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    outbound: mpsc::UnboundedSender<Event>,
}

impl SessionHandle {
    pub fn new(
        session_id: SessionId,
        peer_id: impl Into<String>,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            session_id,
            peer_id: peer_id.into(),
            addr,
            connected_at: Instant::now(),
            outbound,
        }
    }

    /// Queue an event for this peer. Never blocks; the session's writer task
    /// performs the actual I/O.
    pub fn send(&self, event: Event) -> Result<(), SessionClosed> {
        self.outbound.send(event).map_err(|_| SessionClosed)
    }
}

/// Active peer connection: the read side plus the writer task
pub struct PeerSession {
    pub session_id: SessionId,
    addr: SocketAddr,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    outbound: mpsc::UnboundedSender<Event>,
    writer: JoinHandle<()>,
}

impl PeerSession {
    /// Create a new session from a TCP stream and start its writer task
    pub fn new(stream: TcpStream, addr: SocketAddr, session_id: SessionId) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(writer, outbound_rx, addr));

        Self {
            session_id,
            addr,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            outbound,
            writer,
        }
    }

    /// Build the handle the relay uses to reach this peer
    pub fn handle(&self, peer_id: impl Into<String>) -> SessionHandle {
        SessionHandle::new(self.session_id, peer_id, self.addr, self.outbound.clone())
    }

    /// Queue an event directly on this session
    pub fn send(&self, event: Event) -> Result<(), SessionClosed> {
        self.outbound.send(event).map_err(|_| SessionClosed)
    }

    /// Read the next event from this session
    /// Returns None if the connection is closed or the stream is unusable
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(event)) => {
                    debug!(addr = %self.addr, event = event.kind(), "frame received");
                    return Some(event);
                }
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(addr = %self.addr, "skipping undecodable frame: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!(addr = %self.addr, "decode error: {}", e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!(addr = %self.addr, "read error: {}", e);
                    return None;
                }
            }
        }
    }

    /// Stop accepting outbound events and wait until everything queued so far
    /// has been written. Handles cloned out of this session must be dropped
    /// first or this waits for them.
    pub async fn close(self) {
        drop(self.outbound);
        if let Err(e) = self.writer.await {
            warn!(addr = %self.addr, "writer task failed: {}", e);
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Drain the outbound channel onto the socket, batching whatever is queued
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Event>,
    addr: SocketAddr,
) {
    let mut encoder = FrameEncoder::new();

    while let Some(event) = outbound_rx.recv().await {
        let mut next = Some(event);
        while let Some(event) = next {
            if let Err(e) = encoder.encode(&event) {
                warn!(%addr, event = event.kind(), "dropping unencodable event: {}", e);
            }
            next = outbound_rx.try_recv().ok();
        }

        if encoder.is_empty() {
            continue;
        }
        if let Err(e) = writer.write_all(&encoder.take()).await {
            warn!(%addr, "write error: {}", e);
            break;
        }
    }

    let _ = writer.shutdown().await;
}
