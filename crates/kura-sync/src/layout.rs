//! Where items live on disk and how they are encoded.
//!
//! A [`FileConfiguration`] describes one file: its path relative to the
//! synchronized directory, the codec, the value to fall back to, and what to
//! do when the file cannot be decoded. A [`FileResolver`] produces
//! configurations, either from an item (when the engine is about to create a
//! file for it) or from a bare path (when scanning the directory, before the
//! item is known).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kura_types::Identifiable;

use crate::codec::Codec;

/// Produces the value a file starts with.
pub type InitialValue<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// What to do when a file exists but cannot be read or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadRecovery {
    /// Treat the data as lost integrity and halt (panic).
    Fatal,
    /// Log, substitute the initial value, and persist it over the bad file.
    #[default]
    DiscardAndReset,
    /// Return the error to the caller and leave the file alone.
    Propagate,
}

/// Everything needed to read and write one file.
pub struct FileConfiguration<T> {
    /// Path relative to the synchronized directory.
    pub relative_path: PathBuf,
    pub codec: Arc<dyn Codec<T>>,
    pub initial_value: Option<InitialValue<T>>,
    pub recovery: ReadRecovery,
}

impl<T> FileConfiguration<T> {
    pub fn new(relative_path: impl Into<PathBuf>, codec: impl Codec<T> + 'static) -> Self {
        Self {
            relative_path: relative_path.into(),
            codec: Arc::new(codec),
            initial_value: None,
            recovery: ReadRecovery::default(),
        }
    }

    /// Same as [`new`](Self::new) with an already shared codec.
    pub fn with_shared_codec(relative_path: impl Into<PathBuf>, codec: Arc<dyn Codec<T>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            codec,
            initial_value: None,
            recovery: ReadRecovery::default(),
        }
    }

    pub fn with_initial_value(mut self, produce: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.initial_value = Some(Arc::new(produce));
        self
    }

    pub fn with_recovery(mut self, recovery: ReadRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    /// A fresh initial value, if a producer is configured.
    pub fn initial_value(&self) -> Option<T> {
        self.initial_value.as_ref().map(|produce| produce())
    }
}

impl<T> Clone for FileConfiguration<T> {
    fn clone(&self) -> Self {
        Self {
            relative_path: self.relative_path.clone(),
            codec: Arc::clone(&self.codec),
            initial_value: self.initial_value.clone(),
            recovery: self.recovery,
        }
    }
}

impl<T> fmt::Debug for FileConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfiguration")
            .field("relative_path", &self.relative_path)
            .field("extension", &self.codec.extension())
            .field("has_initial_value", &self.initial_value.is_some())
            .field("recovery", &self.recovery)
            .finish()
    }
}

/// Maps items and on-disk paths to file configurations.
pub trait FileResolver<T>: Send + Sync {
    /// Configuration for the file that should hold `item`.
    fn resolve_item(&self, item: &T) -> FileConfiguration<T>;

    /// Configuration for an existing file, or `None` to ignore the entry.
    fn resolve_path(&self, relative_path: &Path) -> Option<FileConfiguration<T>>;
}

/// One file per item, named `<id>.<extension>`.
pub struct ExtensionResolver<T> {
    codec: Arc<dyn Codec<T>>,
    extension: String,
    recovery: ReadRecovery,
    initial_value: Option<InitialValue<T>>,
}

impl<T> ExtensionResolver<T> {
    /// Uses the codec's conventional extension.
    pub fn new(codec: impl Codec<T> + 'static) -> Self {
        let extension = codec.extension().to_string();
        Self {
            codec: Arc::new(codec),
            extension,
            recovery: ReadRecovery::default(),
            initial_value: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_recovery(mut self, recovery: ReadRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    /// Value substituted for unreadable files under `DiscardAndReset`.
    pub fn with_initial_value(mut self, produce: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.initial_value = Some(Arc::new(produce));
        self
    }

    fn configuration(&self, relative_path: PathBuf) -> FileConfiguration<T> {
        FileConfiguration {
            relative_path,
            codec: Arc::clone(&self.codec),
            initial_value: self.initial_value.clone(),
            recovery: self.recovery,
        }
    }
}

/// Path separators in identifiers would escape the directory.
fn file_stem_for(id: &str) -> String {
    id.replace(['/', '\\'], "_")
}

impl<T> FileResolver<T> for ExtensionResolver<T>
where
    T: Identifiable + Send + Sync,
    T::Id: fmt::Display,
{
    fn resolve_item(&self, item: &T) -> FileConfiguration<T> {
        let name = format!("{}.{}", file_stem_for(&item.id().to_string()), self.extension);
        self.configuration(PathBuf::from(name))
    }

    fn resolve_path(&self, relative_path: &Path) -> Option<FileConfiguration<T>> {
        let name = relative_path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }
        let extension = relative_path.extension()?.to_str()?;
        (extension == self.extension).then(|| self.configuration(relative_path.to_path_buf()))
    }
}
