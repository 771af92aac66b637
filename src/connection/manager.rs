//! Connection manager with persistent connections and automatic reconnection

use anyhow::{anyhow, Result};
use relay_shared::{
    codec::{self, FrameDecoder},
    defaults, Event,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connected and handshake sent
    Connected,
    /// Relay refused the handshake
    Rejected { reason: String },
    /// Disconnected from relay
    Disconnected { reason: String },
    /// Received an event from the relay
    Received(Event),
    /// Connection attempt failed, will retry
    ConnectionFailed { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Device ID announced in the handshake
    pub device_id: String,
    /// Relay address
    pub relay_addr: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_id: "device-001".into(),
            relay_addr: defaults::RELAY_ADDR.into(),
            reconnect_delay: Duration::from_millis(defaults::RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(defaults::MAX_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
        }
    }
}

/// Manages the persistent connection to the relay
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// Channel to send events to the relay
    outbound_tx: mpsc::Sender<Event>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Event>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let config_clone = config.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, outbound_rx, event_tx).await;
        });

        Self {
            config,
            outbound_tx,
            event_rx,
        }
    }

    /// Send an event to the relay. Buffered while disconnected.
    pub async fn send(&self, event: Event) -> Result<()> {
        self.outbound_tx
            .send(event)
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    mut outbound_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, TcpStream::connect(&config.relay_addr)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;

                let _ = event_tx.send(ConnectionEvent::Connected).await;

                if let Err(reason) =
                    handle_connection(stream, &config, &mut outbound_rx, &event_tx).await
                {
                    let _ = event_tx
                        .send(ConnectionEvent::Disconnected {
                            reason: reason.to_string(),
                        })
                        .await;
                }
            }
            Ok(Err(e)) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
            Err(_) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: "connect timed out".into(),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            debug!("event receiver dropped, stopping connection loop");
            return;
        }

        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Handle an active connection until it drops
async fn handle_connection(
    stream: TcpStream,
    config: &ConnectionConfig,
    outbound_rx: &mut mpsc::Receiver<Event>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let hello = codec::encode(&Event::connect(&config.device_id))?;
    writer.write_all(&hello).await?;

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            Some(event) = outbound_rx.recv() => {
                let encoded = codec::encode(&event)?;
                writer.write_all(&encoded).await?;
            }

            result = reader.read(&mut read_buf) => {
                let n = result.map_err(|e| anyhow!("Read error: {}", e))?;
                if n == 0 {
                    return Err(anyhow!("Relay closed connection"));
                }
                decoder.extend(&read_buf[..n]);

                loop {
                    match decoder.decode_next() {
                        Ok(Some(Event::Rejected { reason })) => {
                            let _ = event_tx
                                .send(ConnectionEvent::Rejected { reason: reason.clone() })
                                .await;
                            return Err(anyhow!("Rejected by relay: {}", reason));
                        }
                        Ok(Some(event)) => {
                            let _ = event_tx.send(ConnectionEvent::Received(event)).await;
                        }
                        Ok(None) => break,
                        Err(e) if e.is_recoverable() => {
                            warn!("skipping undecodable frame: {}", e);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::{CommandId, ExecuteCommand};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 1024];
            let hello = loop {
                if let Some(event) = decoder.decode_next().unwrap() {
                    break event;
                }
                let n = socket.read(&mut buf).await.unwrap();
                decoder.extend(&buf[..n]);
            };

            let execute = Event::ExecuteCommand(ExecuteCommand {
                device_id: "dev1".into(),
                command_id: CommandId::from("c1"),
                command: "open_chat".into(),
            });
            socket
                .write_all(&codec::encode(&execute).unwrap())
                .await
                .unwrap();
            hello
        });

        let mut conn = ConnectionManager::new(ConnectionConfig {
            device_id: "dev1".into(),
            relay_addr: addr.to_string(),
            ..Default::default()
        });

        assert!(matches!(conn.recv().await, Some(ConnectionEvent::Connected)));
        match conn.recv().await {
            Some(ConnectionEvent::Received(Event::ExecuteCommand(cmd))) => {
                assert_eq!(cmd.command, "open_chat");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(relay.await.unwrap(), Event::connect("dev1"));
        assert_eq!(conn.device_id(), "dev1");
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let rejected = Event::Rejected {
                reason: "an orchestrator is already connected".into(),
            };
            socket
                .write_all(&codec::encode(&rejected).unwrap())
                .await
                .unwrap();
        });

        let mut conn = ConnectionManager::new(ConnectionConfig {
            device_id: "orchestrator".into(),
            relay_addr: addr.to_string(),
            ..Default::default()
        });

        assert!(matches!(conn.recv().await, Some(ConnectionEvent::Connected)));
        assert!(matches!(
            conn.recv().await,
            Some(ConnectionEvent::Rejected { .. })
        ));
    }
}
