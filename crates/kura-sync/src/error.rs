//! Error type for sync operations.

use std::path::PathBuf;

use crate::codec::CodecError;
use crate::vfs::VfsError;

/// Underlying cause of a read or write failure.
#[derive(Debug, thiserror::Error)]
pub enum FileCause {
    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Error type for sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Missing or corrupt file, or codec mismatch.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: FileCause,
    },

    /// I/O or encode failure while flushing.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: FileCause,
    },

    /// The directory itself could not be listed.
    #[error("failed to list {}: {source}", .path.display())]
    DirectoryList {
        path: PathBuf,
        #[source]
        source: VfsError,
    },

    /// The file does not exist and no initial value was configured.
    #[error("no initial value for missing file {}", .0.display())]
    MissingInitialValue(PathBuf),

    /// The coordinator was discarded and performs no further I/O.
    #[error("coordinator for {} was discarded", .0.display())]
    Discarded(PathBuf),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: impl Into<FileCause>) -> Self {
        Self::Read {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: impl Into<FileCause>) -> Self {
        Self::Write {
            path: path.into(),
            source: source.into(),
        }
    }

    /// True when the error is a missing file rather than corruption.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Read {
                source: FileCause::Vfs(e),
                ..
            } => e.is_not_found(),
            Self::MissingInitialValue(_) => true,
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
