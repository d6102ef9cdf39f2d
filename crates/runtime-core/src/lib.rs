//! Runtime Core - Foundation for the distributed checkpointing runtime
//!
//! Provides core types, error handling, configuration, and rank discovery
//! for the distributed checkpoint and snapshot system.

pub mod config;
pub mod error;
pub mod types;
pub mod world;

pub use config::{CheckpointConfig, SnapshotConfig};
pub use error::{Error, Result};
pub use types::*;
pub use world::WorldInfo;
