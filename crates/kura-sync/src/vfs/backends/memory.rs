//! In-memory filesystem backend.
//!
//! Used for testing. All data is ephemeral. Every successful `write` bumps a
//! per-path counter so tests can assert how many flushes reached "disk".

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::FileSystem;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryFs {
    entries: RwLock<HashMap<PathBuf, Entry>>,
    writes: RwLock<HashMap<PathBuf, usize>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            PathBuf::from(""),
            Entry::Directory {
                attr: FileAttr::directory(),
            },
        );
        Self {
            entries: RwLock::new(entries),
            writes: RwLock::new(HashMap::new()),
        }
    }

    /// Number of successful writes to `path` since creation.
    pub fn write_count(&self, path: &Path) -> usize {
        self.writes
            .read()
            .get(&Self::normalize(path))
            .copied()
            .unwrap_or(0)
    }

    /// Total successful writes across all paths.
    pub fn total_writes(&self) -> usize {
        self.writes.read().values().sum()
    }

    /// Overwrite a file behind the engine's back (simulates an external edit).
    /// Parents are created as needed and the write counter is not touched.
    pub fn put(&self, path: &Path, data: impl Into<Vec<u8>>) {
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, &normalized);
        let data = data.into();
        entries.insert(
            normalized,
            Entry::File {
                attr: FileAttr::file(data.len() as u64),
                data,
            },
        );
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    fn ensure_parents(entries: &mut HashMap<PathBuf, Entry>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                entries.entry(current.clone()).or_insert(Entry::Directory {
                    attr: FileAttr::directory(),
                });
            }
        }
    }

    /// Get the path string for error messages.
    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn metadata(&self, path: &Path) -> VfsResult<FileAttr> {
        let normalized = Self::normalize(path);
        self.entries
            .read()
            .get(&normalized)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(Self::path_str(&normalized)))
    }

    async fn list_directory(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::path_str(&normalized))),
            None => return Err(VfsError::not_found(Self::path_str(&normalized))),
        }

        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(entry_path, _)| {
                *entry_path != &normalized && entry_path.parent() == Some(normalized.as_path())
            })
            .filter_map(|(entry_path, entry)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                let kind = match entry {
                    Entry::File { .. } => FileType::File,
                    Entry::Directory { .. } => FileType::Directory,
                };
                Some(DirEntry { name, kind })
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let normalized = Self::normalize(path);
        match self.entries.read().get(&normalized) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory { .. }) => {
                Err(VfsError::is_a_directory(Self::path_str(&normalized)))
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        {
            let mut entries = self.entries.write();

            let parent = normalized.parent().map(Path::to_path_buf).unwrap_or_default();
            match entries.get(&parent) {
                Some(Entry::Directory { .. }) => {}
                Some(_) => return Err(VfsError::not_a_directory(Self::path_str(&parent))),
                None => return Err(VfsError::not_found(Self::path_str(&parent))),
            }
            if let Some(Entry::Directory { .. }) = entries.get(&normalized) {
                return Err(VfsError::is_a_directory(Self::path_str(&normalized)));
            }

            entries.insert(
                normalized.clone(),
                Entry::File {
                    data: data.to_vec(),
                    attr: FileAttr::file(data.len() as u64),
                },
            );
        }
        *self.writes.write().entry(normalized).or_insert(0) += 1;
        Ok(())
    }

    async fn create_directory(&self, path: &Path, recursive: bool) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(&normalized) {
            return match existing {
                Entry::Directory { .. } if recursive => Ok(()),
                _ => Err(VfsError::already_exists(Self::path_str(&normalized))),
            };
        }

        if recursive {
            Self::ensure_parents(&mut entries, &normalized);
        } else {
            let parent = normalized.parent().map(Path::to_path_buf).unwrap_or_default();
            if !matches!(entries.get(&parent), Some(Entry::Directory { .. })) {
                return Err(VfsError::not_found(Self::path_str(&parent)));
            }
        }

        entries.insert(
            normalized,
            Entry::Directory {
                attr: FileAttr::directory(),
            },
        );
        Ok(())
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {
                Err(VfsError::is_a_directory(Self::path_str(&normalized)))
            }
            Some(Entry::File { .. }) => {
                entries.remove(&normalized);
                Ok(())
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }

    fn read_only(&self) -> bool {
        false
    }
}
