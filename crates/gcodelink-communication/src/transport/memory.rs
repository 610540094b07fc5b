//! In-process transport over a `tokio::io::duplex` pipe
//!
//! Every `open` creates a fresh pipe and hands the far end to whoever holds
//! the peer receiver, which can then play the controller. Dropping the far
//! end looks like the device going away.

use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result, TransportKind};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{pump, LinkWriter, PumpExit, Transport, TransportConfig, TransportEvent, TransportLink};

const PIPE_CAPACITY: usize = 4096;

/// Duplex-pipe transport
#[derive(Debug)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<DuplexStream>,
    fail_open: Option<String>,
    kind: TransportKind,
    endpoint: Option<String>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl MemoryTransport {
    /// Create a transport and the receiver of each opened link's far end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                fail_open: None,
                kind: TransportKind::Serial,
                endpoint: None,
                shutdown: None,
                task: None,
            },
            peer_rx,
        )
    }

    /// A transport whose `open` always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        let (mut transport, _) = Self::new();
        transport.fail_open = Some(reason.into());
        transport
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }

    async fn open(&mut self, config: &TransportConfig) -> Result<TransportLink> {
        if let Some(reason) = &self.fail_open {
            return Err(ConnectionError::FailedToOpen {
                endpoint: config.endpoint().to_string(),
                reason: reason.clone(),
            }
            .into());
        }
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(ConnectionError::AlreadyConnected.into());
        }

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.peers
            .send(remote)
            .map_err(|_| ConnectionError::FailedToOpen {
                endpoint: config.endpoint().to_string(),
                reason: "no peer is listening".to_string(),
            })?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let task_token = token.clone();

        self.task = Some(tokio::spawn(async move {
            let reason = match pump(local, &mut out_rx, &event_tx, &task_token).await {
                PumpExit::Shutdown => None,
                PumpExit::Lost(reason) => Some(reason),
            };
            let _ = event_tx.send(TransportEvent::Closed { reason });
        }));
        self.kind = config.kind();
        self.endpoint = Some(config.endpoint().to_string());
        self.shutdown = Some(token);

        Ok(TransportLink {
            writer: LinkWriter::new(out_tx),
            events: event_rx,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pipe_round_trip() {
        let (mut transport, mut peers) = MemoryTransport::new();
        let mut link = transport
            .open(&TransportConfig::serial("mem0"))
            .await
            .expect("open");
        let mut peer = peers.recv().await.expect("peer end");

        link.writer.write(b"$I\n".to_vec()).expect("write");
        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"$I\n");

        peer.write_all(b"ok\n").await.expect("write");
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Data(b"ok\n".to_vec()))
        );
        assert_eq!(transport.endpoint().as_deref(), Some("mem0"));
    }

    #[tokio::test]
    async fn test_peer_drop_closes_link() {
        let (mut transport, mut peers) = MemoryTransport::new();
        let mut link = transport
            .open(&TransportConfig::serial("mem0"))
            .await
            .expect("open");
        drop(peers.recv().await);

        match link.events.recv().await {
            Some(TransportEvent::Closed { reason }) => assert!(reason.is_some()),
            other => panic!("unexpected {:?}", other),
        }
        transport.close().await.expect("close");
        transport.close().await.expect("idempotent close");
    }

    #[tokio::test]
    async fn test_failing_open() {
        let mut transport = MemoryTransport::failing("port busy");
        let err = transport
            .open(&TransportConfig::serial("/dev/ttyUSB0"))
            .await
            .expect_err("must fail");
        assert_eq!(err.to_string(), "Failed to open /dev/ttyUSB0: port busy");
    }
}
