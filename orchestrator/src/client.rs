//! Orchestrator side of a relay connection

use anyhow::{anyhow, bail, Result};
use relay_shared::{
    codec::{self, FrameDecoder},
    AddCommand, CommandStatus, Event,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// A connected, registered orchestrator session
pub struct OrchestratorClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl OrchestratorClient {
    /// Connect and claim the orchestrator role. Fails if the relay already
    /// has an orchestrator.
    pub async fn connect(addr: &str, orchestrator_id: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut client = Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        };

        client.send(&Event::connect(orchestrator_id)).await?;
        match client.recv().await? {
            Event::Status { status } => {
                debug!("relay status: {}", status);
                Ok(client)
            }
            Event::Rejected { reason } => bail!("relay rejected orchestrator: {}", reason),
            other => bail!("unexpected {} during handshake", other.kind()),
        }
    }

    /// Submit one command and wait for the relay's acknowledgment
    pub async fn submit(&mut self, add: AddCommand) -> Result<CommandStatus> {
        self.send(&Event::AddCommand(add)).await?;

        loop {
            match self.recv().await? {
                Event::CommandStatus(ack) => return Ok(ack),
                other => warn!("ignoring {} while waiting for ack", other.kind()),
            }
        }
    }

    async fn send(&mut self, event: &Event) -> Result<()> {
        let encoded = codec::encode(event)?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Event> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(event)) => return Ok(event),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("skipping undecodable frame: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(anyhow!("relay closed connection"));
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}
