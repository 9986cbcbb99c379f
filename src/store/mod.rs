//! Engine persistence
//!
//! Architecture follows the project pattern (trait + impl):
//! - `EngineStore` trait: async repository contract used by the engine
//! - `MemoryStore`: lock-guarded in-memory implementation
//! - `StoreSnapshot`: JSON file persistence of a `MemoryStore` between runs

pub mod memory;
pub mod models;
pub mod snapshot;
pub mod traits;

pub use memory::MemoryStore;
pub use snapshot::StoreSnapshot;
pub use traits::EngineStore;
