//! Storage backend trait definition

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::Result;

/// Async trait for checkpoint storage backends
///
/// Implementors provide binary file operations over paths relative to a
/// storage root. Writes must never leave a partially-written file visible
/// under the final path.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read data from the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist, or a
    /// storage error if the read fails.
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to the given path, atomically
    ///
    /// Creates parent directories if they don't exist. The data is written
    /// to a temporary file, synced, and renamed into place, so readers
    /// never observe a truncated file under `path`.
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, path: &str, data: Bytes) -> Result<u64>;

    /// Create a zero-byte marker file at the given path
    ///
    /// Marker files are an existence-only signal; callers invoke this only
    /// after every write the marker vouches for has returned.
    async fn touch(&self, path: &str) -> Result<()>;

    /// Check if a path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete the file or directory tree at the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List immediate subdirectory names under a relative directory
    ///
    /// Returns an empty list when the directory doesn't exist.
    async fn list_dirs(&self, path: &str) -> Result<Vec<String>>;
}
