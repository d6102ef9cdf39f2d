//! Checkpoint management for distributed training
//!
//! Two persistence paths with different consumers:
//! - [`LocalCheckpointer`] writes one full per-rank snapshot of
//!   {model, optimizers, scheduler, training progress} per step, used for
//!   exact training resumption. No cross-rank coordination.
//! - [`SnapshotWriter`] consolidates sharded model weights onto rank 0,
//!   filters training-only keys, downcasts, and persists a single
//!   inference-ready file plus a readiness marker, optionally on a
//!   background task.

pub mod filter;
pub mod local;
pub mod snapshot;
pub mod state;

pub use filter::{SnapshotKey, SnapshotKeyPlan};
pub use local::LocalCheckpointer;
pub use snapshot::{SnapshotHandle, SnapshotWriter, SNAPSHOT_FILE_NAME, STABLE_MARKER_NAME};
pub use state::{CompositePrefixes, InMemoryState, RestoreReport, StateDict, StateValue, Stateful};
