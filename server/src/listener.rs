//! Relay protocol layer: accepts connections, performs the handshake and
//! routes each inbound event to the relay

use crate::command::Correlation;
use crate::error::RelayError;
use crate::relay::Relay;
use crate::session::{PeerSession, Role, SessionHandle, SessionId};
use anyhow::Result;
use relay_shared::Event;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Accept connections forever, one task per peer
pub async fn serve(listener: TcpListener, relay: Arc<Relay>) -> Result<()> {
    let session_ids = AtomicU64::new(0);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {}", e);
                continue;
            }
        };
        let session_id = session_ids.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%addr, session_id, "connection accepted");

        let relay = relay.clone();
        tokio::spawn(async move {
            handle_peer(stream, addr, session_id, relay).await;
        });
    }
}

/// Drive one connection from handshake to close
async fn handle_peer(stream: TcpStream, addr: SocketAddr, session_id: SessionId, relay: Arc<Relay>) {
    let mut session = PeerSession::new(stream, addr, session_id);

    let peer_id = match handshake(&mut session).await {
        Ok(Some(peer_id)) => peer_id,
        Ok(None) => {
            debug!(%addr, "closed before handshake");
            session.close().await;
            return;
        }
        Err(e) => {
            reject(session, e).await;
            return;
        }
    };

    let handle = session.handle(&peer_id);
    let role = match relay.connect(handle.clone()).await {
        Ok(role) => role,
        Err(e) => {
            drop(handle);
            reject(session, e).await;
            return;
        }
    };

    while let Some(event) = session.recv().await {
        dispatch_event(&relay, role, &handle, event).await;
    }

    relay.disconnect(&peer_id, session_id).await;
    drop(handle);
    session.close().await;
    info!(peer_id = %peer_id, %role, %addr, "connection closed");
}

/// The first frame must be a `connect` naming the peer
async fn handshake(session: &mut PeerSession) -> Result<Option<String>, RelayError> {
    match session.recv().await {
        Some(Event::Connect { device_id }) if !device_id.is_empty() => Ok(Some(device_id)),
        Some(Event::Connect { .. }) => Err(RelayError::InvalidHandshake("empty device_id".into())),
        Some(other) => Err(RelayError::InvalidHandshake(format!(
            "expected connect, got {}",
            other.kind()
        ))),
        None => Ok(None),
    }
}

/// Tell the peer why, then close
async fn reject(session: PeerSession, reason: RelayError) {
    warn!(addr = %session.addr(), session_id = session.session_id, "rejecting connection: {}", reason);
    let _ = session.send(Event::Rejected {
        reason: reason.to_string(),
    });
    session.close().await;
}

/// Route one inbound event by kind and sender role
async fn dispatch_event(relay: &Relay, role: Role, handle: &SessionHandle, event: Event) {
    match (role, event) {
        (Role::Orchestrator, Event::AddCommand(add)) => {
            let ack = relay.submit(add).await;
            if handle.send(Event::CommandStatus(ack)).is_err() {
                warn!(peer_id = %handle.peer_id, "orchestrator gone before ack");
            }
        }
        (Role::Device, Event::CommandResult(result)) => {
            if result.device_id != handle.peer_id {
                warn!(
                    peer_id = %handle.peer_id,
                    device_id = %result.device_id,
                    "result names another device, accepting"
                );
            }
            let outcome = relay.handle_result(&result).await;
            if let Correlation::Offline = outcome.correlation {
                debug!(peer_id = %handle.peer_id, "result dropped, device not registered");
            }
        }
        (_, Event::Connect { device_id }) => {
            warn!(peer_id = %handle.peer_id, device_id = %device_id, "ignoring repeated connect");
        }
        (role, other) => {
            warn!(peer_id = %handle.peer_id, %role, event = other.kind(), "ignoring unexpected event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::{
        codec::{self, FrameDecoder},
        AckStatus, AddCommand, CommandId, CommandResult, DeviceStatus,
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct TestPeer {
        stream: TcpStream,
        decoder: FrameDecoder,
    }

    impl TestPeer {
        async fn open(addr: SocketAddr, peer_id: &str) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut peer = Self {
                stream,
                decoder: FrameDecoder::new(),
            };
            peer.send(&Event::connect(peer_id)).await;
            peer
        }

        async fn send(&mut self, event: &Event) {
            let bytes = codec::encode(event).unwrap();
            self.stream.write_all(&bytes).await.unwrap();
        }

        /// Next event, or None once the relay closed the connection
        async fn recv(&mut self) -> Option<Event> {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(event) = self.decoder.decode_next().unwrap() {
                    return Some(event);
                }
                let n = timeout(WAIT, self.stream.read(&mut buf))
                    .await
                    .expect("timed out waiting for relay")
                    .unwrap();
                if n == 0 {
                    return None;
                }
                self.decoder.extend(&buf[..n]);
            }
        }

        async fn expect_connected(&mut self) {
            assert!(matches!(self.recv().await, Some(Event::Status { .. })));
        }
    }

    async fn start_relay() -> (SocketAddr, Arc<Relay>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = Arc::new(Relay::new("orchestrator"));
        tokio::spawn(serve(listener, relay.clone()));
        (addr, relay)
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        timeout(WAIT, async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_open_chat_over_tcp() {
        let (addr, relay) = start_relay().await;

        let mut orchestrator = TestPeer::open(addr, "orchestrator").await;
        orchestrator.expect_connected().await;
        orchestrator
            .send(&Event::AddCommand(AddCommand::new("dev1", "open_chat")))
            .await;

        match orchestrator.recv().await {
            Some(Event::CommandStatus(ack)) => {
                assert_eq!(ack.status, AckStatus::Added);
                assert_eq!(ack.command_id, Some(CommandId::from("c1")));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let mut device = TestPeer::open(addr, "dev1").await;
        device.expect_connected().await;
        let execute = match device.recv().await {
            Some(Event::ExecuteCommand(cmd)) => cmd,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(execute.command, "open_chat");
        assert_eq!(execute.command_id.as_str(), "c1");
        assert_eq!(relay.status("dev1").await, DeviceStatus::Busy);

        device
            .send(&Event::CommandResult(CommandResult {
                device_id: "dev1".into(),
                command_id: execute.command_id,
                result: json!("ok"),
            }))
            .await;

        let relay_check = relay.clone();
        wait_for(|| {
            let relay = relay_check.clone();
            async move { relay.status("dev1").await == DeviceStatus::Ready }
        })
        .await;
    }

    #[tokio::test]
    async fn test_reconnect_before_old_socket_closes() {
        let (addr, relay) = start_relay().await;

        let mut old = TestPeer::open(addr, "dev1").await;
        old.expect_connected().await;
        let mut new = TestPeer::open(addr, "dev1").await;
        new.expect_connected().await;

        // Closing the replaced socket must not evict the live session
        drop(old);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(relay.status("dev1").await, DeviceStatus::Ready);

        let command_id = relay.enqueue("dev1", "open_chat").await;
        match new.recv().await {
            Some(Event::ExecuteCommand(cmd)) => {
                assert_eq!(cmd.command_id, command_id);
                assert_eq!(cmd.command, "open_chat");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(relay.status("dev1").await, DeviceStatus::Busy);
    }

    #[tokio::test]
    async fn test_second_orchestrator_rejected() {
        let (addr, relay) = start_relay().await;

        let mut first = TestPeer::open(addr, "orchestrator").await;
        first.expect_connected().await;

        let mut second = TestPeer::open(addr, "orchestrator").await;
        assert!(matches!(second.recv().await, Some(Event::Rejected { .. })));
        assert!(second.recv().await.is_none());

        drop(first);
        let relay_check = relay.clone();
        wait_for(|| {
            let relay = relay_check.clone();
            async move { !relay.has_orchestrator().await }
        })
        .await;

        let mut third = TestPeer::open(addr, "orchestrator").await;
        third.expect_connected().await;
    }

    #[tokio::test]
    async fn test_malformed_submission_gets_failed_ack() {
        let (addr, relay) = start_relay().await;

        let mut orchestrator = TestPeer::open(addr, "orchestrator").await;
        orchestrator.expect_connected().await;
        orchestrator
            .send(&Event::AddCommand(AddCommand {
                device_id: Some("dev1".into()),
                ..Default::default()
            }))
            .await;

        match orchestrator.recv().await {
            Some(Event::CommandStatus(ack)) => {
                assert_eq!(ack.status, AckStatus::Failed);
                assert!(ack.command_id.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(relay.pending_count("dev1").await, 0);
    }

    #[tokio::test]
    async fn test_bad_handshake_rejected() {
        let (addr, _relay) = start_relay().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut peer = TestPeer {
            stream,
            decoder: FrameDecoder::new(),
        };
        peer.send(&Event::AddCommand(AddCommand::new("dev1", "open_chat")))
            .await;

        assert!(matches!(peer.recv().await, Some(Event::Rejected { .. })));
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_survives_device_reconnect() {
        let (addr, relay) = start_relay().await;

        let mut device = TestPeer::open(addr, "dev1").await;
        device.expect_connected().await;
        relay.enqueue("dev1", "first").await;
        assert!(matches!(device.recv().await, Some(Event::ExecuteCommand(_))));

        drop(device);
        let relay_check = relay.clone();
        wait_for(|| {
            let relay = relay_check.clone();
            async move { relay.status("dev1").await == DeviceStatus::Offline }
        })
        .await;

        relay.enqueue("dev1", "second").await;
        relay.enqueue("dev1", "third").await;

        let mut device = TestPeer::open(addr, "dev1").await;
        device.expect_connected().await;
        for expected in ["second", "third"] {
            let cmd = match device.recv().await {
                Some(Event::ExecuteCommand(cmd)) => cmd,
                other => panic!("unexpected: {:?}", other),
            };
            assert_eq!(cmd.command, expected);
            device
                .send(&Event::CommandResult(CommandResult {
                    device_id: "dev1".into(),
                    command_id: cmd.command_id,
                    result: json!({"error": "element not found"}),
                }))
                .await;
        }

        let relay_check = relay.clone();
        wait_for(|| {
            let relay = relay_check.clone();
            async move { relay.status("dev1").await == DeviceStatus::Ready }
        })
        .await;
        assert_eq!(relay.pending_count("dev1").await, 0);
    }
}
