//! gcodelink Settings Crate
//!
//! Loads, validates and saves the link configuration, and turns it into the
//! runtime configs the communication crate consumes.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, Config, ConnectionSettings, ConnectionType, DialectSetting,
    ProtocolSettings, StreamingSettings,
};
pub use error::{ConfigError, SettingsError, SettingsResult};
