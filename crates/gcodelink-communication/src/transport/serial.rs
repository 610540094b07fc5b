//! Serial port transport
//!
//! Opens the port with `tokio-serial` and runs the shared byte pump on it.
//! A serial link that drops is not re-opened; the supervisor reports it and
//! waits for an explicit connect.

use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Error, Result, TransportKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use super::{pump, LinkWriter, PumpExit, Transport, TransportConfig, TransportEvent, TransportLink};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB FTDI Serial Port")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// USB vendor ID if applicable
    pub vid: Option<u16>,
    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that look like motion controllers
///
/// Only these names are kept:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| {
            let mut info = SerialPortInfo {
                port_name: port.port_name.clone(),
                description: port_description(&port.port_type),
                manufacturer: None,
                vid: None,
                pid: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.manufacturer = usb.manufacturer.clone();
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
            }
            info
        })
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }
    ["/dev/ttyUSB", "/dev/ttyACM", "/dev/cu.usbserial-", "/dev/cu.usbmodem"]
        .iter()
        .any(|prefix| port_name.starts_with(prefix))
}

fn port_description(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Serial line transport
#[derive(Debug, Default)]
pub struct SerialTransport {
    endpoint: Option<String>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Create a closed transport
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }

    async fn open(&mut self, config: &TransportConfig) -> Result<TransportLink> {
        let TransportConfig::Serial(cfg) = config else {
            return Err(ConnectionError::InvalidParameters {
                reason: "serial transport needs a serial configuration".to_string(),
            }
            .into());
        };
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(ConnectionError::AlreadyConnected.into());
        }

        tracing::info!("Opening serial port {} at {} baud", cfg.port, cfg.baud_rate);
        let stream = tokio_serial::new(&cfg.port, cfg.baud_rate)
            .open_native_async()
            .map_err(|e| ConnectionError::FailedToOpen {
                endpoint: cfg.port.clone(),
                reason: e.to_string(),
            })?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let port = cfg.port.clone();

        let task = tokio::spawn(async move {
            let reason = match pump(stream, &mut out_rx, &event_tx, &task_token).await {
                PumpExit::Shutdown => None,
                PumpExit::Lost(reason) => {
                    tracing::error!("Serial port {} lost: {}", port, reason);
                    Some(reason)
                }
            };
            let _ = event_tx.send(TransportEvent::Closed { reason });
        });

        self.endpoint = Some(cfg.port.clone());
        self.shutdown = Some(token);
        self.task = Some(task);

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
            tracing::info!(
                "Closed serial port {}",
                self.endpoint.as_deref().unwrap_or("?")
            );
        }
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
    }
}
