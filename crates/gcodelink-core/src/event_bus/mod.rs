//! # Event Bus Module
//!
//! Carries notifications from the communication engine to whoever owns the
//! UI session: connection-state changes, raw response lines, parsed
//! telemetry, transfer progress, and errors.
//!
//! Each `ControllerLink` owns one bus. Consumers either register a
//! synchronous handler or take a `tokio::sync::broadcast` receiver.
//!
//! ```rust,ignore
//! use gcodelink_core::event_bus::{AppEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Telemetry]),
//!     |event| {
//!         if let AppEvent::Telemetry(t) = event {
//!             println!("{}", t.description());
//!         }
//!     },
//! );
//! bus.unsubscribe(id);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
