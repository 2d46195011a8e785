//! Directory observer: one watch per directory, many observations.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::source::{ChangeEvent, ChangeSource, ChangeStream};
use crate::config::SyncConfig;
use crate::error::SyncResult;

/// Async callback receiving filtered, non-empty change batches.
pub type ChangeHandler = Arc<dyn Fn(Vec<ChangeEvent>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-observation filtering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Drop events for paths with a dot-prefixed component.
    pub ignore_hidden: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            ignore_hidden: true,
        }
    }
}

impl From<&SyncConfig> for ObserveOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            ignore_hidden: config.ignore_hidden,
        }
    }
}

/// One underlying watch, shared by every observation of the directory.
struct Watch {
    refs: usize,
    pump: CancellationToken,
}

struct ObservationInner {
    directories: Vec<PathBuf>,
    options: ObserveOptions,
    handler: ChangeHandler,
    /// Active `disable_and_perform` scopes, including their grace periods.
    disabled: AtomicUsize,
    cancelled: AtomicBool,
}

impl ObservationInner {
    fn is_live(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire) > 0
    }

    /// Events below one of our directories, minus hidden paths if configured.
    fn filter(&self, batch: &[ChangeEvent]) -> Vec<ChangeEvent> {
        batch
            .iter()
            .filter(|event| {
                self.directories.iter().any(|dir| {
                    let Ok(relative) = event.path.strip_prefix(dir) else {
                        return false;
                    };
                    if relative.as_os_str().is_empty() {
                        return false;
                    }
                    !(self.options.ignore_hidden && is_hidden(relative))
                })
            })
            .cloned()
            .collect()
    }
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Multiplexes change sources across observations.
///
/// Each watched directory has exactly one [`ChangeStream`], created with the
/// first observation that names it and torn down when the last such
/// observation is cancelled. Observations are held weakly and pruned while
/// dispatching.
pub struct DirectoryObserver {
    source: Arc<dyn ChangeSource>,
    watches: DashMap<PathBuf, Watch>,
    observations: Mutex<Vec<Weak<ObservationInner>>>,
    grace: Duration,
    this: Weak<DirectoryObserver>,
}

impl std::fmt::Debug for DirectoryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryObserver")
            .field("source", &self.source)
            .field("watched", &self.watched_directories())
            .finish()
    }
}

impl DirectoryObserver {
    pub fn new(source: Arc<dyn ChangeSource>, config: &SyncConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            source,
            watches: DashMap::new(),
            observations: Mutex::new(Vec::new()),
            grace: config.self_write_grace(),
            this: this.clone(),
        })
    }

    /// Start delivering change batches under `directories` to `handler`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn observe(
        &self,
        directories: Vec<PathBuf>,
        options: ObserveOptions,
        handler: ChangeHandler,
    ) -> SyncResult<Observation> {
        let mut acquired: Vec<PathBuf> = Vec::with_capacity(directories.len());
        for dir in &directories {
            if let Err(e) = self.acquire(dir) {
                self.release(&acquired);
                return Err(e);
            }
            acquired.push(dir.clone());
        }

        let inner = Arc::new(ObservationInner {
            directories,
            options,
            handler,
            disabled: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        });
        self.observations.lock().push(Arc::downgrade(&inner));

        Ok(Observation {
            inner,
            registry: self.this.clone(),
            grace: self.grace,
        })
    }

    /// Directories with a live watch.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.watches.iter().map(|w| w.key().clone()).collect();
        dirs.sort();
        dirs
    }

    /// Number of observations sharing the watch on `directory`.
    pub fn watch_count(&self, directory: &Path) -> usize {
        self.watches.get(directory).map(|w| w.refs).unwrap_or(0)
    }

    /// Count one more observation of `dir`, creating its watch if needed.
    ///
    /// The entry stays locked while the watch is created, so concurrent
    /// callers share a single stream.
    fn acquire(&self, dir: &Path) -> SyncResult<()> {
        match self.watches.entry(dir.to_path_buf()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().refs += 1;
            }
            Entry::Vacant(vacant) => {
                let stream = self.source.watch(dir)?;
                let pump = CancellationToken::new();
                self.spawn_pump(dir.to_path_buf(), stream, pump.clone());
                vacant.insert(Watch { refs: 1, pump });
            }
        }
        Ok(())
    }

    fn release(&self, dirs: &[PathBuf]) {
        for dir in dirs {
            let remove = match self.watches.get_mut(dir) {
                Some(mut watch) => {
                    watch.refs = watch.refs.saturating_sub(1);
                    watch.refs == 0
                }
                None => false,
            };
            if remove {
                if let Some((_, watch)) = self.watches.remove_if(dir, |_, w| w.refs == 0) {
                    watch.pump.cancel();
                    tracing::info!(path = %dir.display(), "stopped watching directory");
                }
            }
        }
    }

    fn spawn_pump(&self, dir: PathBuf, mut stream: ChangeStream, token: CancellationToken) {
        let registry = self.this.clone();
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(path = %dir.display(), "no tokio runtime, change events will not be delivered");
            return;
        };
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    batch = stream.events.recv() => {
                        let Some(batch) = batch else { break };
                        let Some(registry) = registry.upgrade() else { break };
                        registry.dispatch(batch).await;
                    }
                }
            }
            tracing::debug!(path = %dir.display(), "change pump stopped");
        });
    }

    /// Hand `batch` to every live, enabled observation it concerns.
    async fn dispatch(&self, batch: Vec<ChangeEvent>) {
        let live: Vec<Arc<ObservationInner>> = {
            let mut observations = self.observations.lock();
            observations.retain(|weak| weak.upgrade().is_some_and(|o| o.is_live()));
            observations.iter().filter_map(Weak::upgrade).collect()
        };

        for observation in live {
            if observation.is_disabled() {
                tracing::trace!(events = batch.len(), "observation disabled, swallowing batch");
                continue;
            }
            let filtered = observation.filter(&batch);
            if filtered.is_empty() {
                continue;
            }
            (observation.handler)(filtered).await;
        }
    }
}

/// Handle for one observation; cancels itself when dropped.
pub struct Observation {
    inner: Arc<ObservationInner>,
    registry: Weak<DirectoryObserver>,
    grace: Duration,
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("directories", &self.inner.directories)
            .field("cancelled", &!self.inner.is_live())
            .finish()
    }
}

impl Observation {
    pub fn directories(&self) -> &[PathBuf] {
        &self.inner.directories
    }

    pub fn is_cancelled(&self) -> bool {
        !self.inner.is_live()
    }

    /// Stop receiving events. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.inner.directories);
        }
    }

    /// Run `work` with event delivery suppressed.
    ///
    /// Suppression lasts until the self-write grace period after `work`
    /// finishes (or is dropped).
    pub async fn disable_and_perform<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        let _suppressed = Suppression::new(Arc::clone(&self.inner), self.grace);
        work.await
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Re-enables delivery one grace period after being dropped.
struct Suppression {
    inner: Option<Arc<ObservationInner>>,
    grace: Duration,
}

impl Suppression {
    fn new(inner: Arc<ObservationInner>, grace: Duration) -> Self {
        inner.disabled.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Some(inner),
            grace,
        }
    }
}

impl Drop for Suppression {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) if !self.grace.is_zero() => {
                let grace = self.grace;
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    inner.disabled.fetch_sub(1, Ordering::AcqRel);
                });
            }
            _ => {
                inner.disabled.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}
