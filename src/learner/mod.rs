pub mod config;
pub mod decision;
pub mod memory;
pub mod modeling;
pub mod persistence;
pub mod types;

pub use config::LearnerEngineConfig;
pub use persistence::{InMemoryStore, LearnerStore, StoreError};
pub use types::*;
