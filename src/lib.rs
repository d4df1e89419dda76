//! Mode-C serial protocol engine and OBIS payload parser for Turkish
//! MASS-compliant electricity meters.
//!
//! Five components, leaves first: the [`link`] Line Driver, the [`frame`]
//! Framing Codec, the [`session`] Session State Machine, the [`obis`]
//! Grammar & Decoder, and the [`orchestrator`] Operation Orchestrator that
//! composes them into the operations callers invoke. [`config`], [`clock`],
//! [`events`], and [`error`] are the ambient capability/taxonomy layer every
//! other module depends on.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod link;
pub mod obis;
pub mod orchestrator;
pub mod session;

pub use config::{ConnectionKind, OperationConfig};
pub use error::{MeterError, Result};
pub use events::{Event, EventSink, LogLevel};
pub use obis::reading::Reading;
pub use session::Identity;
