//! Engine event system
//!
//! - `EngineEvent`: typed events emitted after scoring, status changes and jobs
//! - `EventBus`: broadcast channel distributing events to TUI/API subscribers

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{EngineEvent, EventEmitter, EventKind};
