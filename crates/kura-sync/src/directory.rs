//! A collection kept in a directory, one file per item.
//!
//! [`DirectoryCoordinator`] holds the current [`Snapshot`] and one
//! [`FileCoordinator`] per identifier. Replacing the snapshot runs the diff
//! and applies the edit script to the files:
//!
//! | Edit     | File I/O                                             |
//! |----------|------------------------------------------------------|
//! | renamed  | none; the coordinator is re-keyed                    |
//! | removed  | coordinator discarded, file deleted                  |
//! | inserted | new coordinator, file written immediately            |
//! | updated  | debounced write through the existing coordinator     |
//!
//! All structural changes (set, load, reload) are serialized on one async
//! mutex. A renamed item keeps the file it already had; a later insert whose
//! file name is taken by it gets a `~N` suffix.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use tokio::sync::broadcast;

use kura_types::{diff, EditScript, Identifiable, Snapshot};

use crate::config::SyncConfig;
use crate::constants::TEMP_FILE_SUFFIX;
use crate::coordinator::FileCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::flows::{ChangeNotice, ChangeOrigin, NoticeBus, Observable};
use crate::layout::FileResolver;
use crate::lifecycle::{Committable, Registration, Sweepable};
use crate::vfs::FileSystem;
use crate::watch::{ChangeEvent, ChangeHandler, DirectoryObserver, Observation, ObserveOptions};

struct DirState<T: Identifiable> {
    /// `None` until the directory was loaded once.
    snapshot: Option<Snapshot<T>>,
    coordinators: HashMap<T::Id, FileCoordinator<T>>,
}

struct DirInner<T: Identifiable> {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    resolver: Arc<dyn FileResolver<T>>,
    config: SyncConfig,
    state: tokio::sync::Mutex<DirState<T>>,
    notices: NoticeBus,
    observation: parking_lot::Mutex<Option<Arc<Observation>>>,
}

/// Observable collection backed by a directory.
pub struct DirectoryCoordinator<T: Identifiable> {
    inner: Arc<DirInner<T>>,
}

impl<T: Identifiable> Clone for DirectoryCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DirectoryCoordinator<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    /// Coordinator without external change tracking.
    pub fn new(
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        resolver: Arc<dyn FileResolver<T>>,
        config: SyncConfig,
    ) -> Self {
        let notices = NoticeBus::new(config.notice_capacity);
        Self {
            inner: Arc::new(DirInner {
                root: root.into(),
                fs,
                resolver,
                config,
                state: tokio::sync::Mutex::new(DirState {
                    snapshot: None,
                    coordinators: HashMap::new(),
                }),
                notices,
                observation: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Coordinator that reloads when files in `root` change on disk.
    pub fn observed(
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        resolver: Arc<dyn FileResolver<T>>,
        observer: &DirectoryObserver,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let coordinator = Self::new(root, fs, resolver, config);
        let weak: Weak<DirInner<T>> = Arc::downgrade(&coordinator.inner);
        let handler: ChangeHandler = Arc::new(move |batch: Vec<ChangeEvent>| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.external_change(batch).await;
                }
            }
            .boxed()
        });

        let options = ObserveOptions::from(&coordinator.inner.config);
        let observation =
            observer.observe(vec![coordinator.inner.root.clone()], options, handler)?;
        *coordinator.inner.observation.lock() = Some(Arc::new(observation));
        Ok(coordinator)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// The current snapshot, loading the directory on first access.
    pub async fn get(&self) -> SyncResult<Snapshot<T>> {
        let mut state = self.inner.state.lock().await;
        if state.snapshot.is_none() {
            self.inner.load_locked(&mut state).await?;
        }
        Ok(state.snapshot.clone().unwrap_or_default())
    }

    /// Replace the collection and reconcile the files.
    ///
    /// Returns the snapshot that was adopted: `new` minus items whose file
    /// could not be created.
    pub async fn set(&self, new: Snapshot<T>) -> SyncResult<Snapshot<T>> {
        let inner = &self.inner;
        let reconciled = inner.suppressed(inner.apply(new)).await?;
        inner.notices.publish(ChangeOrigin::Local);
        Ok(reconciled)
    }

    /// Re-read the directory (loading it if it never was).
    pub async fn reload(&self) -> SyncResult<Snapshot<T>> {
        let mut state = self.inner.state.lock().await;
        if state.snapshot.is_none() {
            self.inner.load_locked(&mut state).await?;
        } else if self.inner.reload_locked(&mut state).await? {
            self.inner.notices.publish(ChangeOrigin::External);
        }
        Ok(state.snapshot.clone().unwrap_or_default())
    }

    /// Flush every live item now.
    ///
    /// All items are attempted; the first failure is returned.
    pub async fn commit(&self) -> SyncResult<()> {
        let coordinators: Vec<FileCoordinator<T>> = {
            let state = self.inner.state.lock().await;
            state.coordinators.values().cloned().collect()
        };
        let inner = &self.inner;
        inner
            .suppressed(async {
                let mut first_error = None;
                for coordinator in coordinators {
                    if let Err(e) = coordinator.commit().await {
                        tracing::warn!(path = %coordinator.path().display(), error = %e, "commit failed");
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            })
            .await
    }

    /// Stop watching and flush.
    pub async fn close(&self) -> SyncResult<()> {
        if let Some(observation) = self.inner.observation.lock().take() {
            observation.cancel();
        }
        self.commit().await
    }

    /// The coordinator currently holding `id`.
    pub async fn coordinator(&self, id: &T::Id) -> Option<FileCoordinator<T>> {
        self.inner.state.lock().await.coordinators.get(id).cloned()
    }
}

impl<T> Sweepable for DirectoryCoordinator<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    fn registration(&self) -> Registration {
        let weak = Arc::downgrade(&self.inner);
        Registration::new(move || {
            let inner = weak.upgrade()?;
            Some(Box::new(DirectoryCoordinator { inner }) as Box<dyn Committable>)
        })
    }
}

impl<T> DirInner<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    async fn suppressed<F: std::future::Future>(&self, work: F) -> F::Output {
        let observation = self.observation.lock().clone();
        match observation {
            Some(observation) => observation.disable_and_perform(work).await,
            None => work.await,
        }
    }

    async fn apply(&self, new: Snapshot<T>) -> SyncResult<Snapshot<T>> {
        let mut state = self.state.lock().await;
        if state.snapshot.is_none() {
            self.load_locked(&mut state).await?;
        }
        let old = state.snapshot.clone().unwrap_or_default();
        let script = diff(&old, &new);
        tracing::debug!(
            root = %self.root.display(),
            removed = script.removed.len(),
            inserted = script.inserted.len(),
            renamed = script.renamed.len(),
            updated = script.updated.len(),
            "reconciling"
        );
        let failed = self.apply_script(&mut state, &script, &new).await;

        let reconciled: Snapshot<T> = new
            .iter()
            .filter(|item| !failed.contains(&item.id()))
            .cloned()
            .collect();
        state.snapshot = Some(reconciled.clone());
        Ok(reconciled)
    }

    /// Apply an edit script; returns the inserted ids that failed.
    async fn apply_script(
        &self,
        state: &mut DirState<T>,
        script: &EditScript<T::Id>,
        new: &Snapshot<T>,
    ) -> HashSet<T::Id> {
        // Renamed files keep their old content until the next commit or drop.
        for (from, to) in &script.renamed {
            let Some(coordinator) = state.coordinators.remove(from) else {
                continue;
            };
            if let Some(item) = new.get(to) {
                coordinator.replace_cached(item.clone());
            }
            tracing::debug!(from = ?from, to = ?to, path = %coordinator.path().display(), "re-keyed");
            state.coordinators.insert(to.clone(), coordinator);
        }

        for id in &script.removed {
            if let Some(coordinator) = state.coordinators.remove(id) {
                if let Err(e) = coordinator.remove_file().await {
                    tracing::warn!(id = ?id, error = %e, "failed to remove file");
                }
            }
        }

        let mut failed = HashSet::new();
        for id in &script.inserted {
            let Some(item) = new.get(id) else {
                continue;
            };
            match self.create(state, item.clone()).await {
                Ok(coordinator) => {
                    state.coordinators.insert(id.clone(), coordinator);
                }
                Err(e) => {
                    tracing::warn!(id = ?id, error = %e, "failed to create file, dropping item");
                    failed.insert(id.clone());
                }
            }
        }

        for id in &script.updated {
            if let (Some(coordinator), Some(item)) = (state.coordinators.get(id), new.get(id)) {
                coordinator.write(item.clone());
            }
        }
        failed
    }

    /// New coordinator for an inserted item, committed at once.
    async fn create(&self, state: &DirState<T>, item: T) -> SyncResult<FileCoordinator<T>> {
        let mut config = self.resolver.resolve_item(&item);
        config.relative_path = vacant_path(state, config.relative_path);

        let path = self.root.join(&config.relative_path);
        if let Some(parent) = path.parent() {
            self.fs
                .create_directory(parent, true)
                .await
                .map_err(|e| SyncError::write(&path, e))?;
        }

        let coordinator =
            FileCoordinator::seeded(&self.root, config, Arc::clone(&self.fs), &self.config, item);
        if let Err(e) = coordinator.commit().await {
            coordinator.discard();
            return Err(e);
        }
        tracing::debug!(path = %coordinator.path().display(), "created");
        Ok(coordinator)
    }

    /// Relative paths of regular files that may hold items, in listing order.
    async fn candidate_files(&self) -> SyncResult<Vec<PathBuf>> {
        let entries = match self.fs.list_directory(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => {
                tracing::debug!(root = %self.root.display(), "directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SyncError::DirectoryList {
                    path: self.root.clone(),
                    source: e,
                });
            }
        };

        Ok(entries
            .into_iter()
            .filter(|entry| entry.is_file())
            .filter(|entry| !entry.is_hidden() && !entry.name.ends_with(TEMP_FILE_SUFFIX))
            .map(|entry| PathBuf::from(entry.name))
            .collect())
    }

    /// Coordinator and value for a file not seen before; `None` to skip it.
    async fn open(&self, relative: &Path) -> Option<(FileCoordinator<T>, T)> {
        let Some(config) = self.resolver.resolve_path(relative) else {
            tracing::trace!(path = %relative.display(), "not an item file, skipping");
            return None;
        };
        let coordinator = FileCoordinator::new(&self.root, config, Arc::clone(&self.fs), &self.config);
        match coordinator.read().await {
            Ok(item) => Some((coordinator, item)),
            Err(e) => {
                coordinator.discard();
                tracing::warn!(path = %coordinator.path().display(), error = %e, "skipping unreadable item");
                None
            }
        }
    }

    /// First materialization of the directory.
    async fn load_locked(&self, state: &mut DirState<T>) -> SyncResult<()> {
        let mut snapshot = Snapshot::new();
        let mut coordinators = HashMap::new();

        for relative in self.candidate_files().await? {
            let Some((coordinator, item)) = self.open(&relative).await else {
                continue;
            };
            adopt(&mut snapshot, &mut coordinators, coordinator, item);
        }

        tracing::info!(root = %self.root.display(), items = snapshot.len(), "loaded directory");
        state.snapshot = Some(snapshot);
        state.coordinators = coordinators;
        Ok(())
    }

    /// Re-read the directory against what is in memory.
    ///
    /// Coordinators whose file is still there are reloaded (or keep their
    /// value if it has not been flushed yet), new files get coordinators, and
    /// coordinators whose file vanished are discarded without deleting
    /// anything. Returns true if the snapshot changed.
    async fn reload_locked(&self, state: &mut DirState<T>) -> SyncResult<bool> {
        let Some(previous) = state.snapshot.take() else {
            return Ok(false);
        };
        let files = match self.candidate_files().await {
            Ok(files) => files,
            Err(e) => {
                state.snapshot = Some(previous);
                return Err(e);
            }
        };

        let mut by_path: HashMap<PathBuf, FileCoordinator<T>> = state
            .coordinators
            .drain()
            .map(|(_, coordinator)| (coordinator.relative_path().to_path_buf(), coordinator))
            .collect();
        let mut loaded = Snapshot::new();
        let mut coordinators = HashMap::new();

        for relative in files {
            let opened = match by_path.remove(&relative) {
                Some(coordinator) => self.refresh(coordinator).await,
                None => self.open(&relative).await,
            };
            if let Some((coordinator, item)) = opened {
                adopt(&mut loaded, &mut coordinators, coordinator, item);
            }
        }
        for (relative, coordinator) in by_path {
            tracing::debug!(path = %relative.display(), "file vanished, discarding");
            coordinator.discard();
        }

        // Keep the in-memory order for surviving items, new ones follow.
        let mut ordered: IndexMap<T::Id, T> = IndexMap::with_capacity(loaded.len());
        for id in previous.ids() {
            if let Some(item) = loaded.get(id) {
                ordered.insert(id.clone(), item.clone());
            }
        }
        for item in loaded {
            ordered.entry(item.id()).or_insert(item);
        }
        let snapshot: Snapshot<T> = ordered.into_values().collect();

        let changed = snapshot != previous;
        tracing::info!(root = %self.root.display(), items = snapshot.len(), changed, "reloaded directory");
        state.snapshot = Some(snapshot);
        state.coordinators = coordinators;
        Ok(changed)
    }

    /// Bring an existing coordinator up to date with its file.
    async fn refresh(&self, coordinator: FileCoordinator<T>) -> Option<(FileCoordinator<T>, T)> {
        if coordinator.has_unflushed_changes() {
            if let Some(item) = coordinator.cached() {
                return Some((coordinator, item));
            }
        }
        match coordinator.reload().await {
            Ok(item) => Some((coordinator, item)),
            Err(e) => {
                tracing::warn!(path = %coordinator.path().display(), error = %e, "reload failed, keeping cached value");
                let item = coordinator.cached()?;
                Some((coordinator, item))
            }
        }
    }

    async fn external_change(&self, batch: Vec<ChangeEvent>) {
        let mut state = self.state.lock().await;
        if state.snapshot.is_none() {
            tracing::trace!(root = %self.root.display(), "not loaded yet, ignoring change");
            return;
        }

        let grace = self.config.self_write_grace();
        let own_echo = |event: &ChangeEvent| {
            state
                .coordinators
                .values()
                .any(|c| c.path() == event.path && c.flushed_within(grace))
        };
        if batch.iter().all(own_echo) {
            tracing::trace!(root = %self.root.display(), events = batch.len(), "ignoring echo of own writes");
            return;
        }

        match self.reload_locked(&mut state).await {
            Ok(true) => {
                drop(state);
                self.notices.publish(ChangeOrigin::External);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "reload after external change failed");
            }
        }
    }
}

/// Add a loaded item, first file wins on duplicate identifiers.
fn adopt<T>(
    snapshot: &mut Snapshot<T>,
    coordinators: &mut HashMap<T::Id, FileCoordinator<T>>,
    coordinator: FileCoordinator<T>,
    item: T,
) where
    T: Identifiable + Clone + Send + Sync + 'static,
{
    let id = item.id();
    if coordinators.contains_key(&id) {
        tracing::warn!(id = ?id, path = %coordinator.path().display(), "duplicate identifier, skipping file");
        coordinator.discard();
        return;
    }
    snapshot.insert(item);
    coordinators.insert(id, coordinator);
}

/// `candidate`, or `stem~N.ext` if a live coordinator already uses it.
fn vacant_path<T: Identifiable>(state: &DirState<T>, candidate: PathBuf) -> PathBuf
where
    T: Clone + Send + Sync + 'static,
{
    let taken: HashSet<&Path> = state
        .coordinators
        .values()
        .map(|c| c.relative_path())
        .collect();
    if !taken.contains(candidate.as_path()) {
        return candidate;
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = candidate.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 2usize;
    loop {
        let name = match &extension {
            Some(ext) => format!("{stem}~{n}.{ext}"),
            None => format!("{stem}~{n}"),
        };
        let path = candidate.with_file_name(name);
        if !taken.contains(path.as_path()) {
            return path;
        }
        n += 1;
    }
}

#[async_trait]
impl<T> Observable<Snapshot<T>> for DirectoryCoordinator<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self) -> SyncResult<Snapshot<T>> {
        DirectoryCoordinator::get(self).await
    }

    async fn set(&self, value: Snapshot<T>) -> SyncResult<()> {
        DirectoryCoordinator::set(self, value).await.map(|_| ())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.inner.notices.subscribe()
    }
}
