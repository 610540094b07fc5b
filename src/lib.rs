//! # gcodelink
//!
//! Keeps a live link to a GRBL or FluidNC motion controller and streams
//! G-code to it:
//! - Serial (USB) and TCP socket transports, with bounded socket reconnect
//! - GRBL byte-budget flow control with single-outstanding fallback
//! - Status report parsing and telemetry notifications
//! - Program streaming with progress, cancellation and halt-on-error
//!
//! ## Architecture
//!
//! 1. **gcodelink-core** - Errors, data model, event bus
//! 2. **gcodelink-communication** - Transports, protocol engine, streamer, supervisor
//! 3. **gcodelink-settings** - Configuration files
//! 4. **gcodelink** - Command-line sender that integrates all crates

pub use gcodelink_communication::{
    list_ports, CommandReply, ControllerLink, Dialect, DialectMode, LinkConfig, RealtimeCommand,
    SendOptions, SerialPortInfo, TransferSummary, TransportConfig,
};
pub use gcodelink_core::{
    AppEvent, ConnectionError, ConnectionState, Error, EventCategory, EventFilter, MachineStatus,
    ProtocolError, Result, TransferError, TransferPhase, TransferProgress,
};
pub use gcodelink_settings::{Config, ConnectionType, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support, INFO by default
/// - Pretty output on stderr, or one JSON object per line with `json`
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    // stdout carries command output, so logs go to stderr
    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
