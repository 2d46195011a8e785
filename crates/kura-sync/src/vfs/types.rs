//! Metadata and listing types.

use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    /// Reported by `LocalFs` only; the engine skips these like directories.
    Symlink,
}

#[derive(Debug, Clone)]
pub struct FileAttr {
    pub size: u64,
    pub kind: FileType,
    pub mtime: SystemTime,
}

impl FileAttr {
    pub(crate) fn file(size: u64) -> Self {
        Self {
            size,
            kind: FileType::File,
            mtime: SystemTime::now(),
        }
    }

    pub(crate) fn directory() -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            mtime: SystemTime::now(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }
}

/// One entry of a directory listing. `name` is the bare file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileType::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    /// Dot-files, including the engine's own temp files.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}
