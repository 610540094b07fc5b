//! TCP socket transport with bounded reconnection
//!
//! Network controllers (FluidNC telnet on port 23, grblHAL ethernet) drop
//! connections when Wi-Fi hiccups. After an unexpected close the I/O task
//! re-dials the same address up to `max_attempts` times, waiting
//! `base_delay * attempt` before each try. The [`LinkWriter`] handed out at
//! open stays valid across reconnects.

use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result, TransportKind};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    pump, LinkWriter, PumpExit, ReconnectPolicy, Transport, TransportConfig, TransportEvent,
    TransportLink,
};

const DEFAULT_PORT: u16 = 23;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Turn a socket URL into a `host:port` address
///
/// Accepts `tcp://host:port`, `telnet://host:port` and bare `host[:port]`.
/// The port defaults to 23.
pub fn parse_socket_url(url: &str) -> std::result::Result<String, ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidParameters {
        reason: format!("{}: {}", reason, url),
    };

    let trimmed = url.trim();
    let rest = match trimmed.split_once("://") {
        Some(("tcp" | "telnet", rest)) => rest,
        Some(_) => return Err(invalid("unsupported socket scheme")),
        None => trimmed,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok(format!("{}:{}", host, port))
}

/// TCP transport
#[derive(Debug, Default)]
pub struct SocketTransport {
    endpoint: Option<String>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl SocketTransport {
    /// Create a closed transport
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }

    async fn open(&mut self, config: &TransportConfig) -> Result<TransportLink> {
        let TransportConfig::Socket(cfg) = config else {
            return Err(ConnectionError::InvalidParameters {
                reason: "socket transport needs a socket configuration".to_string(),
            }
            .into());
        };
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(ConnectionError::AlreadyConnected.into());
        }

        let addr = parse_socket_url(&cfg.url)?;
        tracing::info!("Connecting to {}", addr);
        let stream = dial(&addr).await.map_err(|reason| ConnectionError::FailedToOpen {
            endpoint: cfg.url.clone(),
            reason,
        })?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let session = SocketSession {
            addr,
            auto_reconnect: cfg.auto_reconnect,
            policy: cfg.reconnect,
            outgoing: out_rx,
            events: event_tx,
            shutdown: token.clone(),
        };
        self.task = Some(tokio::spawn(session.run(stream)));
        self.endpoint = Some(cfg.url.clone());
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
            tracing::info!("Closed socket {}", self.endpoint.as_deref().unwrap_or("?"));
        }
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
    }
}

async fn dial(addr: &str) -> std::result::Result<TcpStream, String> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| format!("connect timed out after {:?}", CONNECT_TIMEOUT))?
        .map_err(|e| e.to_string())?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not disable Nagle on {}: {}", addr, e);
    }
    Ok(stream)
}

enum Redial {
    Connected(TcpStream),
    Exhausted,
    Cancelled,
}

struct SocketSession {
    addr: String,
    auto_reconnect: bool,
    policy: ReconnectPolicy,
    outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
}

impl SocketSession {
    async fn run(mut self, mut stream: TcpStream) {
        loop {
            let exit = pump(stream, &mut self.outgoing, &self.events, &self.shutdown).await;
            let reason = match exit {
                PumpExit::Shutdown => {
                    self.emit(TransportEvent::Closed { reason: None });
                    return;
                }
                PumpExit::Lost(reason) => reason,
            };

            tracing::warn!("Socket {} dropped: {}", self.addr, reason);
            if !self.auto_reconnect {
                self.emit(TransportEvent::Closed {
                    reason: Some(reason),
                });
                return;
            }

            self.emit(TransportEvent::Disconnected {
                reason,
                reconnecting: true,
            });
            match self.redial().await {
                Redial::Connected(next) => {
                    tracing::info!("Reconnected to {}", self.addr);
                    self.emit(TransportEvent::Reconnected);
                    stream = next;
                }
                Redial::Exhausted => {
                    tracing::error!(
                        "Giving up on {} after {} reconnect attempts",
                        self.addr,
                        self.policy.max_attempts
                    );
                    self.emit(TransportEvent::Closed {
                        reason: Some(format!(
                            "reconnect failed after {} attempts",
                            self.policy.max_attempts
                        )),
                    });
                    return;
                }
                Redial::Cancelled => {
                    self.emit(TransportEvent::Closed { reason: None });
                    return;
                }
            }
        }
    }

    async fn redial(&mut self) -> Redial {
        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_for(attempt);
            self.emit(TransportEvent::Reconnecting {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            tokio::select! {
                _ = self.shutdown.cancelled() => return Redial::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            // bytes queued while down belong to commands already failed
            while self.outgoing.try_recv().is_ok() {}

            match dial(&self.addr).await {
                Ok(stream) => return Redial::Connected(stream),
                Err(e) => tracing::warn!(
                    "Reconnect attempt {}/{} to {} failed: {}",
                    attempt,
                    self.policy.max_attempts,
                    self.addr,
                    e
                ),
            }
        }
        Redial::Exhausted
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SocketConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_socket_url() {
        assert_eq!(
            parse_socket_url("tcp://192.168.1.50:8080").expect("valid"),
            "192.168.1.50:8080"
        );
        assert_eq!(
            parse_socket_url("telnet://fluidnc.local").expect("valid"),
            "fluidnc.local:23"
        );
        assert_eq!(parse_socket_url("cnc:2323/").expect("valid"), "cnc:2323");
        assert!(parse_socket_url("ws://cnc:80").is_err());
        assert!(parse_socket_url("tcp://:23").is_err());
        assert!(parse_socket_url("cnc:port").is_err());
    }

    fn config(addr: &str, auto_reconnect: bool, max_attempts: u32) -> TransportConfig {
        TransportConfig::Socket(SocketConfig {
            url: format!("tcp://{}", addr),
            auto_reconnect,
            reconnect: ReconnectPolicy {
                max_attempts,
                base_delay_ms: 10,
            },
        })
    }

    #[tokio::test]
    async fn test_round_trip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let mut transport = SocketTransport::new();
        let mut link = transport
            .open(&config(&addr, false, 1))
            .await
            .expect("open");
        let (mut peer, _) = listener.accept().await.expect("accept");

        link.writer.write(b"G0 X1\n".to_vec()).expect("write");
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"G0 X1\n");

        peer.write_all(b"ok\n").await.expect("reply");
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Data(b"ok\n".to_vec()))
        );

        transport.close().await.expect("close");
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Closed { reason: None })
        );
        transport.close().await.expect("second close");
    }

    #[tokio::test]
    async fn test_reconnect_stops_after_max_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let mut transport = SocketTransport::new();
        let mut link = transport
            .open(&config(&addr, true, 3))
            .await
            .expect("open");

        // accept once, then refuse everything
        let (peer, _) = listener.accept().await.expect("accept");
        drop(listener);
        drop(peer);

        let mut attempts = Vec::new();
        loop {
            match link.events.recv().await {
                Some(TransportEvent::Disconnected { reconnecting, .. }) => assert!(reconnecting),
                Some(TransportEvent::Reconnecting { attempt, delay_ms }) => {
                    assert_eq!(delay_ms, 10 * u64::from(attempt));
                    attempts.push(attempt);
                }
                Some(TransportEvent::Closed { reason }) => {
                    assert!(reason.is_some());
                    break;
                }
                Some(TransportEvent::Reconnected) => panic!("listener is gone"),
                Some(TransportEvent::Data(_)) => {}
                None => panic!("event channel closed before Closed"),
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reconnects_to_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let mut transport = SocketTransport::new();
        let mut link = transport
            .open(&config(&addr, true, 5))
            .await
            .expect("open");
        let (first, _) = listener.accept().await.expect("accept");
        drop(first);

        let (mut second, _) = listener.accept().await.expect("second accept");
        loop {
            match link.events.recv().await {
                Some(TransportEvent::Reconnected) => break,
                Some(TransportEvent::Closed { .. }) | None => panic!("should reconnect"),
                Some(_) => {}
            }
        }

        link.writer.write(b"?".to_vec()).expect("same writer");
        let mut buf = [0u8; 1];
        second.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"?");
        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_no_reconnect_when_disabled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let mut transport = SocketTransport::new();
        let mut link = transport
            .open(&config(&addr, false, 5))
            .await
            .expect("open");
        let (peer, _) = listener.accept().await.expect("accept");
        drop(peer);

        match link.events.recv().await {
            Some(TransportEvent::Closed { reason }) => assert!(reason.is_some()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
