//! Per-file coordinator.
//!
//! A [`FileCoordinator`] owns the persistence lifecycle of one value backed by
//! one file:
//!
//! ```text
//!  Uninitialized ──read()──▶ Cached(value) ──write()──▶ Cached(value') ─┐
//!        │                        │  ▲                                   │
//!        │                        │  └──── debounced flush ◀─────────────┘
//!        └────────discard()───────┴──────────▶ Discarded (no more I/O)
//! ```
//!
//! Reads are lazy: the file is only touched on the first cache miss. Writes
//! update the cache at once and flush after a debounce delay; a write that
//! arrives before the delay elapsed cancels the pending flush and re-arms it,
//! and every flush writes the latest local value at that moment. Flushes of the
//! same file are serialized on a per-coordinator async lock, so the file sees
//! writes in submission order.
//!
//! Dropping the last handle of a coordinator whose value never reached disk
//! spawns one final flush (when a tokio runtime is available).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::cache::{SlotCache, ValueCache};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::layout::{FileConfiguration, ReadRecovery};
use crate::lifecycle::{Committable, Registration, Sweepable};
use crate::vfs::FileSystem;

bitflags! {
    /// Lifecycle flags of a coordinator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateFlags: u8 {
        /// The value was loaded (or materialized) at least once.
        const INITIAL_READ_COMPLETE = 1 << 0;
        /// The cached value is what the file holds.
        const LATEST_WRITTEN = 1 << 1;
        /// Terminal: no further I/O.
        const DISCARDED = 1 << 2;
    }
}

/// Subscribes to a value's internal change notifications.
///
/// Called with every value that enters the cache. Each item the stream yields
/// is treated like a `write` of the (mutated) cached value. Returning `None`
/// means the value has nothing to subscribe to.
pub type ChangeFeed<T> = Arc<dyn Fn(&T) -> Option<BoxStream<'static, ()>> + Send + Sync>;

struct State<T> {
    flags: StateFlags,
    /// Armed debounce timer, if any.
    pending: Option<CancellationToken>,
    /// Bumped on every cache mutation; a flush only sets `LATEST_WRITTEN`
    /// if nothing changed while it was writing.
    generation: u64,
    /// The file existed at some point (read or written successfully).
    materialized: bool,
    last_flush: Option<Instant>,
    /// Strong copy of the latest local change until it reaches the file.
    /// The cache may be weak and forget it before the flush runs.
    unflushed: Option<T>,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            flags: StateFlags::default(),
            pending: None,
            generation: 0,
            materialized: false,
            last_flush: None,
            unflushed: None,
        }
    }
}

struct Inner<T> {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    config: FileConfiguration<T>,
    cache: Box<dyn ValueCache<T>>,
    state: Mutex<State<T>>,
    /// Serializes reads and flushes of this file.
    io: tokio::sync::Mutex<()>,
    debounce: Duration,
    change_feed: Mutex<Option<ChangeFeed<T>>>,
    feed_subscription: Mutex<Option<CancellationToken>>,
}

/// Coordinates one value with one file.
///
/// Cheap to clone; clones share the same cache and state.
pub struct FileCoordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FileCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for FileCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCoordinator")
            .field("path", &self.inner.path)
            .field("state", &self.inner.state.lock().flags)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> FileCoordinator<T> {
    /// Coordinator for `root/<relative path>` with a strong [`SlotCache`].
    pub fn new(
        root: &Path,
        config: FileConfiguration<T>,
        fs: Arc<dyn FileSystem>,
        sync: &SyncConfig,
    ) -> Self {
        Self::with_cache(root, config, fs, sync, Box::new(SlotCache::new()))
    }

    /// Coordinator with a caller-chosen cache.
    pub fn with_cache(
        root: &Path,
        config: FileConfiguration<T>,
        fs: Arc<dyn FileSystem>,
        sync: &SyncConfig,
        cache: Box<dyn ValueCache<T>>,
    ) -> Self {
        let path = root.join(&config.relative_path);
        Self {
            inner: Arc::new(Inner {
                path,
                fs,
                config,
                cache,
                state: Mutex::new(State::default()),
                io: tokio::sync::Mutex::new(()),
                debounce: sync.debounce(),
                change_feed: Mutex::new(None),
                feed_subscription: Mutex::new(None),
            }),
        }
    }

    /// Coordinator whose cache is pre-seeded with `value`.
    ///
    /// Nothing is written until [`commit`](Self::commit) or a write.
    pub fn seeded(
        root: &Path,
        config: FileConfiguration<T>,
        fs: Arc<dyn FileSystem>,
        sync: &SyncConfig,
        value: T,
    ) -> Self {
        let coordinator = Self::new(root, config, fs, sync);
        coordinator.inner.cache.store(Some(value.clone()));
        {
            let mut state = coordinator.inner.state.lock();
            state.flags |= StateFlags::INITIAL_READ_COMPLETE;
            state.unflushed = Some(value);
        }
        coordinator
    }

    /// Absolute path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Path relative to the synchronized root.
    pub fn relative_path(&self) -> &Path {
        &self.inner.config.relative_path
    }

    pub fn configuration(&self) -> &FileConfiguration<T> {
        &self.inner.config
    }

    pub fn state(&self) -> StateFlags {
        self.inner.state.lock().flags
    }

    pub fn is_discarded(&self) -> bool {
        self.inner.is_discarded()
    }

    /// True while a local change has not reached the file yet.
    pub fn has_unflushed_changes(&self) -> bool {
        let flags = self.inner.state.lock().flags;
        !flags.intersects(StateFlags::LATEST_WRITTEN | StateFlags::DISCARDED)
    }

    /// True if this coordinator wrote its file less than `window` ago.
    ///
    /// Change notifications for such a file are most likely our own.
    pub fn flushed_within(&self, window: Duration) -> bool {
        self.inner
            .state
            .lock()
            .last_flush
            .is_some_and(|at| at.elapsed() < window)
    }

    /// The cached value, without touching the file.
    pub fn cached(&self) -> Option<T> {
        self.inner.current()
    }

    /// True when both handles refer to the same coordinator.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Install the internal change feed and subscribe to the cached value.
    pub fn set_change_feed(&self, feed: ChangeFeed<T>) {
        *self.inner.change_feed.lock() = Some(feed);
        if let Some(value) = self.inner.cache.retrieve() {
            self.inner.resubscribe(&value);
        }
    }

    /// The current value, loading it from disk on a cache miss.
    ///
    /// A missing file is materialized from the initial value. An unreadable
    /// one goes through the configured [`ReadRecovery`].
    pub async fn read(&self) -> SyncResult<T> {
        if let Some(value) = self.inner.current() {
            return Ok(value);
        }
        let _io = self.inner.io.lock().await;
        if let Some(value) = self.inner.current() {
            return Ok(value);
        }
        if self.inner.is_discarded() {
            return Err(SyncError::Discarded(self.inner.path.clone()));
        }
        self.inner.load_locked().await
    }

    /// Drop the cached value and read the file again.
    ///
    /// A pending debounced write is cancelled: the file wins.
    pub async fn reload(&self) -> SyncResult<T> {
        let _io = self.inner.io.lock().await;
        if self.inner.is_discarded() {
            return Err(SyncError::Discarded(self.inner.path.clone()));
        }
        self.inner.cancel_pending();
        self.inner.load_locked().await
    }

    /// Cache `value` and schedule a debounced flush.
    ///
    /// Returns immediately. Background flush failures are logged.
    pub fn write(&self, value: T) {
        if self.inner.is_discarded() {
            tracing::debug!(path = %self.inner.path.display(), "ignoring write to discarded coordinator");
            return;
        }
        self.inner.store(value.clone());
        self.inner.mark_unflushed(value);
        self.inner.schedule_flush();
    }

    /// Cache `value` and flush it before returning.
    pub async fn write_immediately(&self, value: T) -> SyncResult<()> {
        if self.inner.is_discarded() {
            tracing::debug!(path = %self.inner.path.display(), "ignoring write to discarded coordinator");
            return Ok(());
        }
        self.inner.store(value.clone());
        self.inner.mark_unflushed(value);
        self.inner.flush().await
    }

    /// Swap the cached value without any I/O.
    ///
    /// The file no longer counts as up to date: a reload keeps `value`, and
    /// the next commit, write or final drop persists it. No flush is
    /// scheduled.
    pub fn replace_cached(&self, value: T) {
        if self.inner.is_discarded() {
            return;
        }
        self.inner.store(value.clone());
        self.inner.mark_unflushed(value);
    }

    /// Flush the cached value now.
    ///
    /// No-op once discarded. Without a cached value the live value is loaded
    /// first and written back.
    pub async fn commit(&self) -> SyncResult<()> {
        if self.inner.is_discarded() {
            return Ok(());
        }
        self.inner.cancel_pending();
        if self.inner.current().is_none() {
            self.read().await?;
        }
        self.inner.flush().await
    }

    /// Stop all I/O for this coordinator.
    ///
    /// Returns false if it was already discarded.
    pub fn discard(&self) -> bool {
        self.inner.discard()
    }

    /// Discard and delete the backing file.
    pub async fn remove_file(&self) -> SyncResult<()> {
        self.inner.discard();
        let _io = self.inner.io.lock().await;
        let path = &self.inner.path;
        match self.inner.fs.remove(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed file");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                if self.inner.state.lock().materialized {
                    tracing::warn!(path = %path.display(), "file already gone before removal");
                }
                Ok(())
            }
            Err(e) => Err(SyncError::write(path, e)),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Sweepable for FileCoordinator<T> {
    fn registration(&self) -> Registration {
        let weak = Arc::downgrade(&self.inner);
        Registration::new(move || {
            let inner = weak.upgrade()?;
            Some(Box::new(FileCoordinator { inner }) as Box<dyn Committable>)
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    fn is_discarded(&self) -> bool {
        self.state.lock().flags.contains(StateFlags::DISCARDED)
    }

    fn discard(&self) -> bool {
        let mut state = self.state.lock();
        if state.flags.contains(StateFlags::DISCARDED) {
            return false;
        }
        state.flags.insert(StateFlags::DISCARDED);
        state.unflushed = None;
        if let Some(pending) = state.pending.take() {
            pending.cancel();
        }
        drop(state);
        if let Some(subscription) = self.feed_subscription.lock().take() {
            subscription.cancel();
        }
        tracing::debug!(path = %self.path.display(), "discarded");
        true
    }

    fn cancel_pending(&self) {
        if let Some(pending) = self.state.lock().pending.take() {
            pending.cancel();
        }
    }

    /// Put `value` in the cache and follow its change feed.
    fn store(self: &Arc<Self>, value: T) {
        self.cache.store(Some(value.clone()));
        self.resubscribe(&value);
    }

    /// Latest local value: the unflushed copy, else whatever is cached.
    fn current(&self) -> Option<T> {
        let unflushed = self.state.lock().unflushed.clone();
        unflushed.or_else(|| self.cache.retrieve())
    }

    /// Record that `value` is newer than the file.
    fn mark_unflushed(&self, value: T) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.flags.remove(StateFlags::LATEST_WRITTEN);
        state.unflushed = Some(value);
    }

    /// (Re)arm the debounce timer for the latest unflushed value.
    fn schedule_flush(self: &Arc<Self>) {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if state.flags.contains(StateFlags::DISCARDED) {
                return;
            }
            if let Some(previous) = state.pending.replace(token.clone()) {
                previous.cancel();
            }
            state.generation
        };

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(path = %self.path.display(), "no tokio runtime, write stays pending until commit");
            return;
        };
        let inner = Arc::clone(self);
        let delay = self.debounce;
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut state = inner.state.lock();
                        if state.generation == generation {
                            state.pending = None;
                        }
                    }
                    if let Err(e) = inner.flush().await {
                        tracing::warn!(path = %inner.path.display(), error = %e, "debounced flush failed");
                    }
                }
            }
        });
    }

    async fn flush(&self) -> SyncResult<()> {
        let _io = self.io.lock().await;
        self.flush_locked().await
    }

    /// Write the latest local value. Caller holds the I/O lock.
    async fn flush_locked(&self) -> SyncResult<()> {
        let (value, generation) = {
            let state = self.state.lock();
            if state.flags.contains(StateFlags::DISCARDED) {
                return Ok(());
            }
            (state.unflushed.clone(), state.generation)
        };
        let Some(value) = value.or_else(|| self.cache.retrieve()) else {
            return Ok(());
        };
        self.write_value_locked(&value).await?;

        let mut state = self.state.lock();
        if state.generation == generation {
            state.flags.insert(StateFlags::LATEST_WRITTEN);
            state.unflushed = None;
        }
        Ok(())
    }

    async fn write_value_locked(&self, value: &T) -> SyncResult<()> {
        let bytes = self
            .config
            .codec
            .encode(value)
            .map_err(|e| SyncError::write(&self.path, e))?;

        match self.fs.write(&self.path, &bytes).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                if let Some(parent) = self.path.parent() {
                    self.fs
                        .create_directory(parent, true)
                        .await
                        .map_err(|e| SyncError::write(&self.path, e))?;
                }
                self.fs
                    .write(&self.path, &bytes)
                    .await
                    .map_err(|e| SyncError::write(&self.path, e))?;
            }
            Err(e) => return Err(SyncError::write(&self.path, e)),
        }

        {
            let mut state = self.state.lock();
            state.materialized = true;
            state.last_flush = Some(Instant::now());
        }
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "flushed");
        Ok(())
    }

    /// Load from disk into the cache. Caller holds the I/O lock.
    async fn load_locked(self: &Arc<Self>) -> SyncResult<T> {
        let decoded = match self.fs.read(&self.path).await {
            Ok(bytes) => self
                .config
                .codec
                .decode(&bytes)
                .map_err(|e| SyncError::read(&self.path, e)),
            Err(e) if e.is_not_found() => return self.materialize_initial().await,
            Err(e) => Err(SyncError::read(&self.path, e)),
        };

        match decoded {
            Ok(value) => {
                self.state.lock().materialized = true;
                self.adopt(value.clone());
                tracing::debug!(path = %self.path.display(), "loaded");
                Ok(value)
            }
            Err(error) => self.recover(error).await,
        }
    }

    /// First read of a file that was never written.
    async fn materialize_initial(self: &Arc<Self>) -> SyncResult<T> {
        let value = self
            .config
            .initial_value()
            .ok_or_else(|| SyncError::MissingInitialValue(self.path.clone()))?;
        self.write_value_locked(&value).await?;
        self.adopt(value.clone());
        tracing::debug!(path = %self.path.display(), "materialized initial value");
        Ok(value)
    }

    async fn recover(self: &Arc<Self>, error: SyncError) -> SyncResult<T> {
        match self.config.recovery {
            ReadRecovery::Fatal => {
                tracing::error!(path = %self.path.display(), error = %error, "unrecoverable read failure");
                panic!("unrecoverable read failure: {error}");
            }
            ReadRecovery::DiscardAndReset => {
                let Some(value) = self.config.initial_value() else {
                    return Err(error);
                };
                tracing::warn!(
                    path = %self.path.display(),
                    error = %error,
                    "discarding unreadable file, resetting to initial value"
                );
                self.write_value_locked(&value).await?;
                self.adopt(value.clone());
                Ok(value)
            }
            ReadRecovery::Propagate => Err(error),
        }
    }

    /// Cache a value known to match the file.
    fn adopt(self: &Arc<Self>, value: T) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.flags |= StateFlags::INITIAL_READ_COMPLETE | StateFlags::LATEST_WRITTEN;
            state.unflushed = None;
        }
        self.store(value);
    }

    fn resubscribe(self: &Arc<Self>, value: &T) {
        let Some(feed) = self.change_feed.lock().clone() else {
            return;
        };
        if let Some(previous) = self.feed_subscription.lock().take() {
            previous.cancel();
        }
        let Some(mut changes) = feed(value) else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(path = %self.path.display(), "no tokio runtime, change feed ignored");
            return;
        };

        let token = CancellationToken::new();
        *self.feed_subscription.lock() = Some(token.clone());
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = changes.next() => {
                        if next.is_none() {
                            break;
                        }
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        tracing::trace!(path = %inner.path.display(), "internal change");
                        if let Some(value) = inner.cache.retrieve() {
                            inner.mark_unflushed(value);
                            inner.schedule_flush();
                        }
                    }
                }
            }
        });
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.feed_subscription.get_mut().take() {
            subscription.cancel();
        }
        let state = self.state.get_mut();
        if state.flags.intersects(StateFlags::DISCARDED | StateFlags::LATEST_WRITTEN) {
            return;
        }
        let unflushed = state.unflushed.take();
        let Some(value) = unflushed.or_else(|| self.cache.retrieve()) else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(path = %self.path.display(), "dropped with unflushed value outside a runtime");
            return;
        };
        let bytes = match self.config.codec.encode(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "final flush failed to encode");
                return;
            }
        };
        let fs = Arc::clone(&self.fs);
        let path = std::mem::take(&mut self.path);
        runtime.spawn(async move {
            match fs.write(&path, &bytes).await {
                Ok(()) => tracing::debug!(path = %path.display(), "final flush"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "final flush failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::WeakCache;
    use crate::codec::{JsonCodec, SharedCodec, TextCodec};
    use crate::vfs::MemoryFs;

    fn text_config() -> FileConfiguration<String> {
        FileConfiguration::new("motd.txt", TextCodec).with_initial_value(|| "hello".to_string())
    }

    fn setup() -> (Arc<MemoryFs>, FileCoordinator<String>) {
        let fs = Arc::new(MemoryFs::new());
        let coordinator = FileCoordinator::new(
            Path::new("/data"),
            text_config(),
            fs.clone(),
            &SyncConfig::for_tests(),
        );
        (fs, coordinator)
    }

    async fn settle() {
        tokio::time::sleep(SyncConfig::for_tests().debounce() * 4).await;
    }

    #[tokio::test]
    async fn test_read_missing_file_materializes_initial_value() {
        let (fs, coordinator) = setup();
        assert_eq!(coordinator.read().await.unwrap(), "hello");
        assert_eq!(fs.read(Path::new("/data/motd.txt")).await.unwrap(), b"hello");
        assert!(coordinator
            .state()
            .contains(StateFlags::INITIAL_READ_COMPLETE | StateFlags::LATEST_WRITTEN));
    }

    #[tokio::test]
    async fn test_read_without_initial_value_fails() {
        let fs = Arc::new(MemoryFs::new());
        let coordinator = FileCoordinator::new(
            Path::new("/data"),
            FileConfiguration::new("x.txt", TextCodec),
            fs,
            &SyncConfig::for_tests(),
        );
        let err = coordinator.read().await.unwrap_err();
        assert!(matches!(err, SyncError::MissingInitialValue(_)));
    }

    #[tokio::test]
    async fn test_read_is_cached() {
        let (fs, coordinator) = setup();
        fs.put(Path::new("/data/motd.txt"), "on disk");
        assert_eq!(coordinator.read().await.unwrap(), "on disk");

        fs.put(Path::new("/data/motd.txt"), "changed behind our back");
        assert_eq!(coordinator.read().await.unwrap(), "on disk");
        assert_eq!(coordinator.reload().await.unwrap(), "changed behind our back");
    }

    #[tokio::test]
    async fn test_debounced_writes_coalesce() {
        let (fs, coordinator) = setup();
        let path = Path::new("/data/motd.txt");
        for i in 0..5 {
            coordinator.write(format!("v{i}"));
        }
        assert_eq!(fs.write_count(path), 0);
        assert!(!coordinator.state().contains(StateFlags::LATEST_WRITTEN));

        settle().await;
        assert_eq!(fs.write_count(path), 1);
        assert_eq!(fs.read(path).await.unwrap(), b"v4");
        assert!(coordinator.state().contains(StateFlags::LATEST_WRITTEN));
    }

    #[tokio::test]
    async fn test_write_immediately() {
        let (fs, coordinator) = setup();
        coordinator.write_immediately("now".to_string()).await.unwrap();
        assert_eq!(fs.read(Path::new("/data/motd.txt")).await.unwrap(), b"now");
        assert!(coordinator.state().contains(StateFlags::LATEST_WRITTEN));
    }

    #[tokio::test]
    async fn test_commit_flushes_pending_write() {
        let (fs, coordinator) = setup();
        let path = Path::new("/data/motd.txt");
        coordinator.write("pending".to_string());
        coordinator.commit().await.unwrap();
        assert_eq!(fs.read(path).await.unwrap(), b"pending");

        settle().await;
        assert_eq!(fs.write_count(path), 1, "commit cancels the debounced flush");
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let (fs, coordinator) = setup();
        let path = Path::new("/data/motd.txt");
        coordinator.write("stable".to_string());
        coordinator.commit().await.unwrap();
        let first = fs.read(path).await.unwrap();
        coordinator.commit().await.unwrap();
        assert_eq!(fs.read(path).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_discard_stops_io() {
        let (fs, coordinator) = setup();
        let path = Path::new("/data/motd.txt");
        coordinator.write("never".to_string());
        assert!(coordinator.discard());
        assert!(!coordinator.discard());

        settle().await;
        coordinator.commit().await.unwrap();
        coordinator.write_immediately("still never".to_string()).await.unwrap();
        assert_eq!(fs.write_count(path), 0);
        assert!(coordinator.state().contains(StateFlags::DISCARDED));
    }

    #[tokio::test]
    async fn test_remove_file() {
        let (fs, coordinator) = setup();
        coordinator.read().await.unwrap();
        coordinator.remove_file().await.unwrap();
        assert!(!fs.exists(Path::new("/data/motd.txt")).await);
        assert!(coordinator.is_discarded());
    }

    #[tokio::test]
    async fn test_discard_and_reset_recovery() {
        let fs = Arc::new(MemoryFs::new());
        fs.put(Path::new("/data/n.json"), "{ not json");
        let config = FileConfiguration::new("n.json", JsonCodec::default())
            .with_initial_value(|| vec![1u32, 2])
            .with_recovery(ReadRecovery::DiscardAndReset);
        let coordinator =
            FileCoordinator::new(Path::new("/data"), config, fs.clone(), &SyncConfig::for_tests());

        assert_eq!(coordinator.read().await.unwrap(), vec![1, 2]);
        assert_eq!(fs.read(Path::new("/data/n.json")).await.unwrap(), b"[1,2]");
    }

    #[tokio::test]
    async fn test_propagate_recovery_leaves_file() {
        let fs = Arc::new(MemoryFs::new());
        fs.put(Path::new("/data/n.json"), "{ not json");
        let config = FileConfiguration::new("n.json", JsonCodec::default())
            .with_initial_value(Vec::<u32>::new)
            .with_recovery(ReadRecovery::Propagate);
        let coordinator =
            FileCoordinator::new(Path::new("/data"), config, fs.clone(), &SyncConfig::for_tests());

        let err = coordinator.read().await.unwrap_err();
        assert!(matches!(err, SyncError::Read { .. }));
        assert_eq!(fs.read(Path::new("/data/n.json")).await.unwrap(), b"{ not json");
    }

    #[tokio::test]
    #[should_panic(expected = "unrecoverable read failure")]
    async fn test_fatal_recovery_panics() {
        let fs = Arc::new(MemoryFs::new());
        fs.put(Path::new("/data/n.json"), "{ not json");
        let config = FileConfiguration::new("n.json", JsonCodec::default())
            .with_initial_value(Vec::<u32>::new)
            .with_recovery(ReadRecovery::Fatal);
        let coordinator =
            FileCoordinator::new(Path::new("/data"), config, fs, &SyncConfig::for_tests());
        let _ = coordinator.read().await;
    }

    #[tokio::test]
    async fn test_write_creates_missing_parent() {
        let fs = Arc::new(MemoryFs::new());
        let coordinator = FileCoordinator::new(
            Path::new("/data/nested/deeper"),
            text_config(),
            fs.clone(),
            &SyncConfig::for_tests(),
        );
        coordinator.write_immediately("deep".to_string()).await.unwrap();
        assert_eq!(
            fs.read(Path::new("/data/nested/deeper/motd.txt")).await.unwrap(),
            b"deep"
        );
    }

    #[tokio::test]
    async fn test_drop_flushes_unwritten_value() {
        let fs = Arc::new(MemoryFs::new());
        fs.create_directory(Path::new("/data"), true).await.unwrap();
        let coordinator = FileCoordinator::seeded(
            Path::new("/data"),
            text_config(),
            fs.clone(),
            &SyncConfig::for_tests(),
            "last words".to_string(),
        );
        drop(coordinator);

        settle().await;
        assert_eq!(fs.read(Path::new("/data/motd.txt")).await.unwrap(), b"last words");
    }

    #[tokio::test]
    async fn test_drop_after_discard_writes_nothing() {
        let fs = Arc::new(MemoryFs::new());
        fs.create_directory(Path::new("/data"), true).await.unwrap();
        let coordinator = FileCoordinator::seeded(
            Path::new("/data"),
            text_config(),
            fs.clone(),
            &SyncConfig::for_tests(),
            "unsaid".to_string(),
        );
        coordinator.discard();
        drop(coordinator);

        settle().await;
        assert_eq!(fs.total_writes(), 0);
    }

    #[tokio::test]
    async fn test_replace_cached_waits_for_commit() {
        let (fs, coordinator) = setup();
        let path = Path::new("/data/motd.txt");
        coordinator.read().await.unwrap();
        assert_eq!(fs.write_count(path), 1);

        coordinator.replace_cached("renamed".to_string());
        assert!(coordinator.has_unflushed_changes());
        assert_eq!(coordinator.cached().as_deref(), Some("renamed"));
        settle().await;
        assert_eq!(fs.write_count(path), 1, "no flush is scheduled");

        coordinator.commit().await.unwrap();
        assert_eq!(fs.read(path).await.unwrap(), b"renamed");
        assert!(!coordinator.has_unflushed_changes());
    }

    #[tokio::test]
    async fn test_drop_flushes_replaced_value() {
        let (fs, coordinator) = setup();
        coordinator.read().await.unwrap();
        coordinator.replace_cached("renamed".to_string());
        drop(coordinator);

        settle().await;
        assert_eq!(fs.read(Path::new("/data/motd.txt")).await.unwrap(), b"renamed");
    }

    fn weak_setup() -> (Arc<MemoryFs>, FileCoordinator<Arc<u32>>) {
        let fs = Arc::new(MemoryFs::new());
        let config = FileConfiguration::new("n.json", SharedCodec(JsonCodec::default()))
            .with_initial_value(|| Arc::new(0u32));
        let coordinator = FileCoordinator::with_cache(
            Path::new("/data"),
            config,
            fs.clone(),
            &SyncConfig::for_tests(),
            Box::new(WeakCache::new()),
        );
        (fs, coordinator)
    }

    #[tokio::test]
    async fn test_weak_cache_write_outlives_caller_handle() {
        let (fs, coordinator) = weak_setup();
        let path = Path::new("/data/n.json");
        coordinator.write(Arc::new(42));
        assert_eq!(coordinator.cached().as_deref(), Some(&42));

        settle().await;
        assert_eq!(fs.read(path).await.unwrap(), b"42");
        assert!(!coordinator.has_unflushed_changes());
        assert!(coordinator.cached().is_none(), "flushed value is no longer pinned");

        coordinator.commit().await.unwrap();
        assert_eq!(fs.read(path).await.unwrap(), b"42");
    }

    #[tokio::test]
    async fn test_weak_cache_commit_before_debounce() {
        let (fs, coordinator) = weak_setup();
        coordinator.write(Arc::new(7));
        coordinator.commit().await.unwrap();
        assert_eq!(fs.read(Path::new("/data/n.json")).await.unwrap(), b"7");
        assert_eq!(*coordinator.read().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_change_feed_triggers_flush() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Clone)]
        struct Counter {
            hits: Arc<AtomicUsize>,
            changes: tokio::sync::broadcast::Sender<()>,
        }

        let (tx, _) = tokio::sync::broadcast::channel(8);
        let counter = Counter {
            hits: Arc::new(AtomicUsize::new(0)),
            changes: tx.clone(),
        };

        struct CounterCodec;
        impl crate::codec::Codec<Counter> for CounterCodec {
            fn encode(&self, value: &Counter) -> Result<Vec<u8>, crate::codec::CodecError> {
                Ok(value.hits.load(Ordering::SeqCst).to_string().into_bytes())
            }
            fn decode(&self, _bytes: &[u8]) -> Result<Counter, crate::codec::CodecError> {
                unreachable!("never read in this test")
            }
            fn extension(&self) -> &'static str {
                "txt"
            }
        }

        let fs = Arc::new(MemoryFs::new());
        let coordinator = FileCoordinator::new(
            Path::new("/data"),
            FileConfiguration::new("count.txt", CounterCodec),
            fs.clone(),
            &SyncConfig::for_tests(),
        );
        coordinator.set_change_feed(Arc::new(|value: &Counter| {
            let rx = value.changes.subscribe();
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.ok().map(|_| ((), rx))
            });
            Some(stream.boxed())
        }));
        coordinator.write_immediately(counter.clone()).await.unwrap();

        counter.hits.store(3, Ordering::SeqCst);
        tx.send(()).unwrap();

        settle().await;
        assert_eq!(fs.read(Path::new("/data/count.txt")).await.unwrap(), b"3");
    }
}
