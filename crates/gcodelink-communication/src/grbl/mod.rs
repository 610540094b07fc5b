//! GRBL wire vocabulary
//!
//! Everything needed to turn the controller's byte stream into typed
//! responses: line assembly, response classification, status report
//! decoding, code descriptions, and the realtime command bytes.

pub mod error_decoder;
pub mod line_assembler;
pub mod realtime;
pub mod response_parser;
pub mod status_parser;

pub use error_decoder::{describe_alarm, describe_error};
pub use line_assembler::{LineAssembler, MAX_LINE_LENGTH};
pub use realtime::RealtimeCommand;
pub use response_parser::{parse_line, AlarmReport, ControllerResponse, FirmwareError};
pub use status_parser::StatusReport;
