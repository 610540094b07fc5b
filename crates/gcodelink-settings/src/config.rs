//! Configuration file handling for gcodelink
//!
//! Supports JSON and TOML files; the format follows the file extension.
//! Configuration is organized into sections:
//! - Connection settings (transport, endpoint, reconnect policy)
//! - Protocol settings (dialect, buffer size, timeouts)
//! - Streaming settings (progress reporting, notification delivery)
//!
//! Every section has defaults, so a file only needs the keys it changes.

use gcodelink_communication::{
    Dialect, DialectMode, EngineConfig, LinkConfig, ReconnectPolicy, SerialConfig, SocketConfig,
    SupervisorConfig, TransportConfig, DEFAULT_RX_BUFFER_SIZE,
};
use gcodelink_core::EventBusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Transport used for the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Serial/USB connection
    #[default]
    Serial,
    /// TCP socket connection
    Socket,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Socket => write!(f, "socket"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Which transport to open
    pub connection_type: ConnectionType,
    /// Serial device path
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Socket address, `tcp://host:port` or `host[:port]`
    pub url: String,
    /// Re-dial a socket link after an unexpected close
    pub auto_reconnect: bool,
    /// Re-dial attempts before giving up
    pub reconnect_attempts: u32,
    /// Delay unit between re-dial attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Wait before the first status request after connecting, in milliseconds
    pub settle_delay_ms: u64,
    /// Send a status request once the link is up
    pub status_on_connect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let reconnect = ReconnectPolicy::default();
        let supervisor = SupervisorConfig::default();
        Self {
            connection_type: ConnectionType::Serial,
            port: default_serial_port().to_string(),
            baud_rate: gcodelink_communication::transport::DEFAULT_BAUD_RATE,
            url: "tcp://192.168.0.1:23".to_string(),
            auto_reconnect: true,
            reconnect_attempts: reconnect.max_attempts,
            reconnect_delay_ms: reconnect.base_delay_ms,
            settle_delay_ms: supervisor.settle_delay.as_millis() as u64,
            status_on_connect: supervisor.status_on_connect,
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(windows) {
        "COM3"
    } else if cfg!(target_os = "macos") {
        "/dev/cu.usbserial"
    } else {
        "/dev/ttyUSB0"
    }
}

/// Flow-control dialect selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectSetting {
    /// Infer from the first status report
    #[default]
    Auto,
    /// Count bytes against the controller's receive buffer
    ByteBudget,
    /// One unacknowledged line at a time
    SingleOutstanding,
}

impl std::fmt::Display for DialectSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::ByteBudget => write!(f, "byte_budget"),
            Self::SingleOutstanding => write!(f, "single_outstanding"),
        }
    }
}

/// Protocol engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Dialect selection
    pub dialect: DialectSetting,
    /// Controller receive buffer size in bytes, for `byte_budget`
    pub rx_buffer_size: usize,
    /// Acknowledgement timeout in milliseconds
    pub command_timeout_ms: u64,
    /// Status report timeout in milliseconds
    pub status_timeout_ms: u64,
    /// Maximum commands waiting for buffer space
    pub queue_capacity: usize,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            dialect: DialectSetting::Auto,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            command_timeout_ms: engine.command_timeout.as_millis() as u64,
            status_timeout_ms: engine.status_timeout.as_millis() as u64,
            queue_capacity: engine.queue_capacity,
        }
    }
}

/// Program streaming and notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Print progress every this many lines in the command-line sender
    pub progress_interval: usize,
    /// Broadcast channel capacity for notification receivers
    pub event_channel_capacity: usize,
    /// Keep recent notifications in memory
    pub keep_event_history: bool,
    /// Number of notifications kept when history is on
    pub event_history_size: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        let bus = EventBusConfig::default();
        Self {
            progress_interval: 25,
            event_channel_capacity: bus.channel_capacity,
            keep_event_history: bus.enable_history,
            event_history_size: bus.max_history_size,
        }
    }
}

/// Complete link configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Protocol engine settings
    pub protocol: ProtocolSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Json,
    Toml,
}

fn file_format(path: &Path) -> SettingsResult<FileFormat> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(FileFormat::Json),
        Some("toml") => Ok(FileFormat::Toml),
        other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("<none>").to_string()).into()),
    }
}

/// `<config dir>/gcodelink/config.toml` for the current platform
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("gcodelink").join("config.toml"))
        .ok_or_else(|| {
            ConfigError::UnsupportedPlatform("no configuration directory".to_string()).into()
        })
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = file_format(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::LoadError {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = match format {
            FileFormat::Json => serde_json::from_str(&content)?,
            FileFormat::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating the parent directory
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match file_format(path)? {
            FileFormat::Json => serde_json::to_string_pretty(self)?,
            FileFormat::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content).map_err(|source| SettingsError::SaveError {
            path: path.display().to_string(),
            source,
        })?;

        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let connection = &self.connection;
        match connection.connection_type {
            ConnectionType::Serial => {
                if connection.port.trim().is_empty() {
                    return Err(SettingsError::invalid("connection.port", "must not be empty"));
                }
                if connection.baud_rate == 0 {
                    return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
                }
            }
            ConnectionType::Socket => {
                if connection.url.trim().is_empty() {
                    return Err(SettingsError::invalid("connection.url", "must not be empty"));
                }
                if connection.auto_reconnect && connection.reconnect_attempts == 0 {
                    return Err(SettingsError::invalid(
                        "connection.reconnect_attempts",
                        "must be > 0 when auto_reconnect is on",
                    ));
                }
            }
        }

        let protocol = &self.protocol;
        if protocol.rx_buffer_size == 0 {
            return Err(SettingsError::invalid("protocol.rx_buffer_size", "must be > 0"));
        }
        if protocol.command_timeout_ms == 0 {
            return Err(SettingsError::invalid("protocol.command_timeout_ms", "must be > 0"));
        }
        if protocol.status_timeout_ms == 0 {
            return Err(SettingsError::invalid("protocol.status_timeout_ms", "must be > 0"));
        }
        if protocol.queue_capacity == 0 {
            return Err(SettingsError::invalid("protocol.queue_capacity", "must be > 0"));
        }

        if self.streaming.event_channel_capacity == 0 {
            return Err(SettingsError::invalid(
                "streaming.event_channel_capacity",
                "must be > 0",
            ));
        }

        Ok(())
    }

    /// Transport selected by the connection section
    pub fn transport_config(&self) -> TransportConfig {
        let connection = &self.connection;
        match connection.connection_type {
            ConnectionType::Serial => TransportConfig::Serial(SerialConfig {
                port: connection.port.clone(),
                baud_rate: connection.baud_rate,
            }),
            ConnectionType::Socket => TransportConfig::Socket(SocketConfig {
                url: connection.url.clone(),
                auto_reconnect: connection.auto_reconnect,
                reconnect: ReconnectPolicy {
                    max_attempts: connection.reconnect_attempts,
                    base_delay_ms: connection.reconnect_delay_ms,
                },
            }),
        }
    }

    /// Protocol engine config
    pub fn engine_config(&self) -> EngineConfig {
        let protocol = &self.protocol;
        let dialect_mode = match protocol.dialect {
            DialectSetting::Auto => DialectMode::Auto,
            DialectSetting::ByteBudget => DialectMode::Fixed(Dialect::ByteBudget {
                capacity: protocol.rx_buffer_size,
            }),
            DialectSetting::SingleOutstanding => DialectMode::Fixed(Dialect::SingleOutstanding),
        };
        EngineConfig {
            dialect_mode,
            command_timeout: Duration::from_millis(protocol.command_timeout_ms),
            status_timeout: Duration::from_millis(protocol.status_timeout_ms),
            queue_capacity: protocol.queue_capacity,
        }
    }

    /// Connection supervisor config
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            settle_delay: Duration::from_millis(self.connection.settle_delay_ms),
            status_on_connect: self.connection.status_on_connect,
        }
    }

    /// Notification bus config
    pub fn event_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            channel_capacity: self.streaming.event_channel_capacity,
            enable_history: self.streaming.keep_event_history,
            max_history_size: self.streaming.event_history_size,
            ..Default::default()
        }
    }

    /// Everything `ControllerLink::new` needs
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            engine: self.engine_config(),
            supervisor: self.supervisor_config(),
            bus: self.event_bus_config(),
        }
    }
}
