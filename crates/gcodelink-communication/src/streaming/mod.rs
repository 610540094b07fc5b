//! Program streaming.

mod session;
mod streamer;

pub use session::{SourceLine, TransferSession};
pub use streamer::{ProgramStreamer, TransferSummary};
