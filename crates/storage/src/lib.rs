//! Storage - File persistence for checkpoint and snapshot data
//!
//! Provides async storage operations with atomic writes and
//! existence-only marker files.
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/checkpoints");
//! storage.write("step_100/local_rank_0.ckpt", Bytes::from(vec![1, 2, 3])).await?;
//! let data = storage.read("step_100/local_rank_0.ckpt").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;

pub use backend::StorageBackend;
pub use local::LocalStorage;
