//! Transport adapters
//!
//! A transport moves raw bytes and nothing else. Opening one yields a
//! [`TransportLink`]: a cloneable [`LinkWriter`] for outbound bytes and a
//! channel of [`TransportEvent`]s carrying inbound data and link changes.
//!
//! - [`SerialTransport`]: USB/RS-232 via `tokio-serial`
//! - [`SocketTransport`]: TCP (FluidNC telnet, grblHAL network) with
//!   bounded auto-reconnect
//! - [`MemoryTransport`]: in-process duplex pipe for tests and demos

mod memory;
mod serial;
mod socket;

pub use memory::MemoryTransport;
pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use socket::{parse_socket_url, SocketTransport};

use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result, TransportKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default serial baud rate for GRBL 1.1
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const READ_BUFFER_SIZE: usize = 1024;

/// Bounded linear backoff for socket reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n` times this
    pub base_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the 1-based `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Serial port parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Socket parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// `tcp://host:port`, `telnet://host:port` or `host[:port]`
    pub url: String,
    /// Re-dial after an unexpected close
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Backoff used when re-dialing
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_true() -> bool {
    true
}

/// Which transport to open and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial line
    Serial(SerialConfig),
    /// TCP socket
    Socket(SocketConfig),
}

impl TransportConfig {
    /// Serial config with the default baud rate
    pub fn serial(port: impl Into<String>) -> Self {
        TransportConfig::Serial(SerialConfig {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        })
    }

    /// Socket config with auto-reconnect and the default policy
    pub fn socket(url: impl Into<String>) -> Self {
        TransportConfig::Socket(SocketConfig {
            url: url.into(),
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Transport variant
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial(_) => TransportKind::Serial,
            TransportConfig::Socket(_) => TransportKind::Socket,
        }
    }

    /// Port path or socket URL
    pub fn endpoint(&self) -> &str {
        match self {
            TransportConfig::Serial(cfg) => &cfg.port,
            TransportConfig::Socket(cfg) => &cfg.url,
        }
    }
}

/// Notifications from an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from the peer
    Data(Vec<u8>),
    /// The link dropped; `reconnecting` tells whether a re-dial follows
    Disconnected {
        /// Why the link dropped
        reason: String,
        /// A reconnect loop is starting
        reconnecting: bool,
    },
    /// About to wait and re-dial
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Wait before dialing, in milliseconds
        delay_ms: u64,
    },
    /// A re-dial succeeded; the same writer is live again
    Reconnected,
    /// The link is gone for good. `None` when closed on request
    Closed {
        /// Failure reason
        reason: Option<String>,
    },
}

/// Outbound half of a link
///
/// Writes are queued on an unbounded channel and flushed by the
/// transport's I/O task in order.
#[derive(Debug, Clone)]
pub struct LinkWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl LinkWriter {
    /// Wrap a sender; the receiving end belongs to the I/O task
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Queue bytes for the peer
    pub fn write(&self, bytes: impl Into<Vec<u8>>) -> std::result::Result<(), ConnectionError> {
        self.tx
            .send(bytes.into())
            .map_err(|_| ConnectionError::ConnectionLost {
                reason: "transport writer closed".to_string(),
            })
    }

    /// True once the I/O task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open link
#[derive(Debug)]
pub struct TransportLink {
    /// Outbound bytes
    pub writer: LinkWriter,
    /// Inbound data and link changes
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Byte transport to a controller
#[async_trait]
pub trait Transport: Send {
    /// Variant of this transport
    fn kind(&self) -> TransportKind;

    /// Endpoint of the open (or last opened) link
    fn endpoint(&self) -> Option<String>;

    /// Open the link described by `config`
    async fn open(&mut self, config: &TransportConfig) -> Result<TransportLink>;

    /// Close the link. Closing a closed transport does nothing
    async fn close(&mut self) -> Result<()>;
}

/// Build the transport matching `config`
pub fn transport_for(config: &TransportConfig) -> Box<dyn Transport> {
    match config {
        TransportConfig::Serial(_) => Box::new(SerialTransport::new()),
        TransportConfig::Socket(_) => Box::new(SocketTransport::new()),
    }
}

/// Why [`pump`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PumpExit {
    /// The shutdown token fired
    Shutdown,
    /// The stream failed or the peer closed it
    Lost(String),
}

/// Shuttle bytes between a stream and the link channels until one side ends
pub(crate) async fn pump<S>(
    stream: S,
    outgoing: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    shutdown: &CancellationToken,
) -> PumpExit
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = writer.shutdown().await;
                return PumpExit::Shutdown;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => return PumpExit::Lost("peer closed the connection".to_string()),
                Ok(n) => {
                    if events.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                        return PumpExit::Shutdown;
                    }
                }
                Err(e) => return PumpExit::Lost(format!("read failed: {}", e)),
            },
            bytes = outgoing.recv() => match bytes {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        return PumpExit::Lost(format!("write failed: {}", e));
                    }
                    if let Err(e) = writer.flush().await {
                        return PumpExit::Lost(format!("flush failed: {}", e));
                    }
                }
                // every writer handle dropped
                None => return PumpExit::Shutdown,
            },
        }
    }
}
