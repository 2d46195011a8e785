//! A single value kept in a single file.
//!
//! [`FileValue`] puts an [`Observable`] face on a [`FileCoordinator`]. With a
//! [`DirectoryObserver`] it also watches the file's parent directory and
//! reloads when the file is edited from outside.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::coordinator::{FileCoordinator, StateFlags};
use crate::error::{SyncError, SyncResult};
use crate::flows::{ChangeNotice, ChangeOrigin, NoticeBus, Observable};
use crate::lifecycle::{Committable, Registration, Sweepable};
use crate::watch::{ChangeEvent, ChangeHandler, DirectoryObserver, Observation, ObserveOptions};

struct ValueInner<T> {
    coordinator: FileCoordinator<T>,
    notices: NoticeBus,
    observation: Mutex<Option<Arc<Observation>>>,
    grace: Duration,
}

/// Observable scalar backed by one file.
pub struct FileValue<T> {
    inner: Arc<ValueInner<T>>,
}

impl<T> Clone for FileValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FileValue<T> {
    /// Value without external change tracking.
    pub fn new(coordinator: FileCoordinator<T>, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(ValueInner {
                coordinator,
                notices: NoticeBus::new(config.notice_capacity),
                observation: Mutex::new(None),
                grace: config.self_write_grace(),
            }),
        }
    }

    /// Value that reloads when its file changes on disk.
    pub fn observed(
        coordinator: FileCoordinator<T>,
        observer: &DirectoryObserver,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let value = Self::new(coordinator, config);
        let file = value.inner.coordinator.path().to_path_buf();
        let directory = file
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| SyncError::Watch(format!("{} has no parent directory", file.display())))?;

        let weak = Arc::downgrade(&value.inner);
        let handler: ChangeHandler = Arc::new(move |batch: Vec<ChangeEvent>| {
            let weak = weak.clone();
            let file = file.clone();
            async move {
                if !batch.iter().any(|event| event.path == file) {
                    return;
                }
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.external_change().await;
                }
            }
            .boxed()
        });

        let observation = observer.observe(vec![directory], ObserveOptions::from(config), handler)?;
        *value.inner.observation.lock() = Some(Arc::new(observation));
        Ok(value)
    }

    pub fn coordinator(&self) -> &FileCoordinator<T> {
        &self.inner.coordinator
    }

    /// Write `value` and flush before returning.
    pub async fn set_immediately(&self, value: T) -> SyncResult<()> {
        let coordinator = &self.inner.coordinator;
        self.inner
            .suppressed(coordinator.write_immediately(value))
            .await?;
        self.inner.notices.publish(ChangeOrigin::Local);
        Ok(())
    }

    /// Flush any pending write now.
    pub async fn commit(&self) -> SyncResult<()> {
        let coordinator = &self.inner.coordinator;
        self.inner.suppressed(coordinator.commit()).await
    }

    /// Stop watching the file and flush.
    pub async fn close(&self) -> SyncResult<()> {
        if let Some(observation) = self.inner.observation.lock().take() {
            observation.cancel();
        }
        self.inner.coordinator.commit().await
    }
}

impl<T: Clone + Send + Sync + 'static> Sweepable for FileValue<T> {
    fn registration(&self) -> Registration {
        let weak = Arc::downgrade(&self.inner);
        Registration::new(move || {
            let inner = weak.upgrade()?;
            Some(Box::new(FileValue { inner }) as Box<dyn Committable>)
        })
    }
}

impl<T: Clone + Send + Sync + 'static> ValueInner<T> {
    /// Run `work` with this value's own change events suppressed.
    async fn suppressed<F: std::future::Future>(&self, work: F) -> F::Output {
        let observation = self.observation.lock().clone();
        match observation {
            Some(observation) => observation.disable_and_perform(work).await,
            None => work.await,
        }
    }

    async fn external_change(&self) {
        let coordinator = &self.coordinator;
        if !coordinator.state().contains(StateFlags::INITIAL_READ_COMPLETE) {
            tracing::trace!(path = %coordinator.path().display(), "not read yet, ignoring change");
            return;
        }
        if coordinator.has_unflushed_changes() || coordinator.flushed_within(self.grace) {
            tracing::trace!(path = %coordinator.path().display(), "local change wins, ignoring event");
            return;
        }
        match coordinator.reload().await {
            Ok(_) => {
                tracing::debug!(path = %coordinator.path().display(), "reloaded after external change");
                self.notices.publish(ChangeOrigin::External);
            }
            Err(e) => {
                tracing::warn!(path = %coordinator.path().display(), error = %e, "reload after external change failed");
            }
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Observable<T> for FileValue<T> {
    async fn get(&self) -> SyncResult<T> {
        self.inner.coordinator.read().await
    }

    /// Debounced: returns once the value is cached.
    async fn set(&self, value: T) -> SyncResult<()> {
        let coordinator = &self.inner.coordinator;
        self.inner
            .suppressed(async { coordinator.write(value) })
            .await;
        self.inner.notices.publish(ChangeOrigin::Local);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.inner.notices.subscribe()
    }
}
