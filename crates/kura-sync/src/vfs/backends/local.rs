//! Local filesystem backend.
//!
//! Writes are crash-safe: the new contents go to a hidden temp file next to
//! the target, are synced, then renamed over the target. A reader never sees
//! a half-written file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::constants::TEMP_FILE_SUFFIX;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::FileSystem;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Local filesystem backend.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    read_only: bool,
}

impl LocalFs {
    /// Create a writable local filesystem.
    pub fn new() -> Self {
        Self { read_only: false }
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Sibling temp path used for atomic replacement.
    fn temp_path(path: &Path) -> VfsResult<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| VfsError::invalid_path(path.display().to_string()))?;
        let temp_name = format!(".{}{}", name.to_string_lossy(), TEMP_FILE_SUFFIX);
        Ok(path.with_file_name(temp_name))
    }

    fn kind_of(file_type: &std::fs::FileType) -> FileType {
        if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        }
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn metadata(&self, path: &Path) -> VfsResult<FileAttr> {
        let meta = fs::symlink_metadata(path).await?;
        Ok(FileAttr {
            size: meta.len(),
            kind: Self::kind_of(&meta.file_type()),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        })
    }

    async fn list_directory(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: Self::kind_of(&file_type),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path) -> VfsResult<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.check_writable()?;
        let temp = Self::temp_path(path)?;

        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn create_directory(&self, path: &Path, recursive: bool) -> VfsResult<()> {
        self.check_writable()?;
        if recursive {
            fs::create_dir_all(path).await?;
        } else {
            fs::create_dir(path).await?;
        }
        Ok(())
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let meta = fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        fs::remove_file(path).await?;
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalFs, TempDir) {
        (LocalFs::new(), TempDir::new().unwrap())
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (fs, dir) = setup();
        let path = dir.path().join("note.json");

        fs.write(&path, b"hello world").await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"hello world");

        fs.write(&path, b"short").await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let (fs, dir) = setup();
        fs.write(&dir.path().join("a.json"), b"{}").await.unwrap();

        let entries = fs.list_directory(dir.path()).await.unwrap();
        assert_eq!(entries, vec![DirEntry::file("a.json")]);
    }

    #[tokio::test]
    async fn test_write_without_parent_fails() {
        let (fs, dir) = setup();
        let result = fs.write(&dir.path().join("missing/a.json"), b"{}").await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_directory_sorted_with_kinds() {
        let (fs, dir) = setup();
        fs.create_directory(&dir.path().join("sub"), false).await.unwrap();
        fs.write(&dir.path().join("b.txt"), b"b").await.unwrap();
        fs.write(&dir.path().join("a.txt"), b"a").await.unwrap();

        let entries = fs.list_directory(dir.path()).await.unwrap();
        assert_eq!(
            entries,
            vec![DirEntry::file("a.txt"), DirEntry::file("b.txt"), DirEntry::directory("sub")]
        );
    }

    #[tokio::test]
    async fn test_recursive_create_directory_is_idempotent() {
        let (fs, dir) = setup();
        let nested = dir.path().join("a/b/c");
        fs.create_directory(&nested, true).await.unwrap();
        fs.create_directory(&nested, true).await.unwrap();
        assert!(fs.metadata(&nested).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_remove() {
        let (fs, dir) = setup();
        let path = dir.path().join("gone.txt");
        fs.write(&path, b"x").await.unwrap();
        assert!(fs.exists(&path).await);

        fs.remove(&path).await.unwrap();
        assert!(!fs.exists(&path).await);
        assert!(fs.remove(&path).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_directory_refused() {
        let (fs, dir) = setup();
        let result = fs.remove(dir.path()).await;
        assert!(matches!(result, Err(VfsError::IsADirectory(_))));
    }

    #[tokio::test]
    async fn test_read_only() {
        let (mut fs, dir) = setup();
        fs.set_read_only(true);

        let result = fs.write(&dir.path().join("test.txt"), b"x").await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }
}
