//! File system operations trait.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;

use super::types::{DirEntry, FileAttr};
use super::VfsResult;

/// The file system operations the sync engine relies on.
///
/// Everything is whole-file and path-based. Implementations must be safe to
/// share between the coordinating task and background flush tasks.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn metadata(&self, path: &Path) -> VfsResult<FileAttr>;

    /// List the entries of a directory, sorted by name.
    async fn list_directory(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read the full contents of a file.
    async fn read(&self, path: &Path) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Replace the full contents of a file, creating it if needed.
    ///
    /// The parent directory must already exist.
    async fn write(&self, path: &Path, data: &[u8]) -> VfsResult<()>;

    /// Create a directory. With `recursive`, missing parents are created
    /// and an existing directory is not an error.
    async fn create_directory(&self, path: &Path, recursive: bool) -> VfsResult<()>;

    /// Remove a file.
    async fn remove(&self, path: &Path) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.metadata(path).await.is_ok()
    }
}
