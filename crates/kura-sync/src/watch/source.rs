//! Change sources: where raw file-system notifications come from.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
    AttributeChanged,
}

/// One raw change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Receiving end of a directory watch.
///
/// The watch stays active while the stream (and its guard) is alive.
pub struct ChangeStream {
    pub events: mpsc::Receiver<Vec<ChangeEvent>>,
    _guard: Box<dyn Any + Send>,
}

impl ChangeStream {
    pub fn new(events: mpsc::Receiver<Vec<ChangeEvent>>, guard: impl Any + Send) -> Self {
        Self {
            events,
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStream").finish_non_exhaustive()
    }
}

/// Produces change batches for one directory (non-recursive).
pub trait ChangeSource: Send + Sync + fmt::Debug {
    fn watch(&self, directory: &Path) -> SyncResult<ChangeStream>;
}

// ── notify ──────────────────────────────────────────────────────────────

/// OS notifications through `notify::RecommendedWatcher`.
#[derive(Debug, Clone)]
pub struct NotifySource {
    capacity: usize,
    poll_interval: Duration,
}

impl NotifySource {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            capacity: config.event_channel_capacity,
            poll_interval: config.poll_interval(),
        }
    }
}

impl Default for NotifySource {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(ChangeKind::AttributeChanged),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

fn batch_from(event: Event) -> Vec<ChangeEvent> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .into_iter()
        .map(|path| ChangeEvent { path, kind })
        .collect()
}

impl ChangeSource for NotifySource {
    fn watch(&self, directory: &Path) -> SyncResult<ChangeStream> {
        std::fs::create_dir_all(directory)
            .map_err(|e| SyncError::Watch(format!("{}: {}", directory.display(), e)))?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let batch = batch_from(event);
                    if !batch.is_empty() && tx.try_send(batch).is_err() {
                        tracing::trace!("change channel full or closed, dropping batch");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "file watcher error"),
            },
            notify::Config::default().with_poll_interval(self.poll_interval),
        )
        .map_err(|e| SyncError::Watch(e.to_string()))?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| SyncError::Watch(format!("{}: {}", directory.display(), e)))?;

        tracing::info!(path = %directory.display(), "watching directory");
        Ok(ChangeStream::new(rx, watcher))
    }
}

// ── manual ──────────────────────────────────────────────────────────────

/// Hand-fed change source for hermetic tests.
///
/// [`emit`](Self::emit) delivers a batch to whoever currently watches the
/// directory; batches for unwatched directories are dropped.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    senders: Arc<DashMap<PathBuf, mpsc::Sender<Vec<ChangeEvent>>>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `events` as one batch to the watcher of `directory`.
    ///
    /// Returns false if nobody watches it.
    pub async fn emit(&self, directory: &Path, events: Vec<ChangeEvent>) -> bool {
        let Some(tx) = self.senders.get(directory).map(|entry| entry.value().clone()) else {
            return false;
        };
        tx.send(events).await.is_ok()
    }

    /// True while `directory` has a live watch.
    pub fn is_watching(&self, directory: &Path) -> bool {
        self.senders
            .get(directory)
            .is_some_and(|entry| !entry.value().is_closed())
    }
}

impl ChangeSource for ManualSource {
    fn watch(&self, directory: &Path) -> SyncResult<ChangeStream> {
        let (tx, rx) = mpsc::channel(crate::constants::DEFAULT_EVENT_CHANNEL_CAPACITY);
        self.senders.insert(directory.to_path_buf(), tx);
        Ok(ChangeStream::new(rx, ()))
    }
}
