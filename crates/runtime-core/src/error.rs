//! Error types for the distributed checkpointing runtime

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the distributed checkpointing runtime
#[derive(Error, Debug)]
pub enum Error {
    // Checkpoint errors
    #[error("Checkpoint not found: {path}")]
    CheckpointNotFound { path: String },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    #[error("State mismatch: {} missing, {} unexpected keys", missing_keys.len(), unexpected_keys.len())]
    StateMismatch {
        missing_keys: Vec<String>,
        unexpected_keys: Vec<String>,
    },

    #[error("Restore left objects in an inconsistent state at stage '{stage}': {source}")]
    RestoreInconsistent {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    // Snapshot errors
    #[error("Snapshot already in flight for {path}")]
    SnapshotInFlight { path: String },

    #[error("Background snapshot task failed: {message}")]
    Background { message: String },

    // Collective errors
    #[error("Gather inconsistency for tensor '{tensor}': {reason}")]
    GatherInconsistency { tensor: String, reason: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Channel errors
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage { .. } | Error::Io(_))
    }

    /// Returns true if this error indicates a fatal condition
    ///
    /// Fatal errors mean the in-memory training state can no longer be
    /// trusted and the caller must not continue training from it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CheckpointCorrupted { .. }
                | Error::RestoreInconsistent { .. }
                | Error::GatherInconsistency { .. }
                | Error::InvalidConfig { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
