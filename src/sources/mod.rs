//! External data sources
//!
//! - `DataSource` trait: sync and status mirroring for one external system
//! - `InboxSource`: drop-folder source fed by out-of-process connectors
//! - `RecordingSource`: call-recording mock for tests

pub mod inbox;
pub mod mock;
pub mod traits;

pub use inbox::InboxSource;
pub use mock::RecordingSource;
pub use traits::{DataSource, SyncReport};
