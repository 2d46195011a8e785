//! Commit sweeps on application lifecycle events.
//!
//! The host forwards its "about to go inactive" signals into a broadcast
//! channel; the [`LifecycleSweeper`] commits everything registered with it
//! before the process may be suspended or terminated.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use kura_types::Identifiable;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::coordinator::FileCoordinator;
use crate::directory::DirectoryCoordinator;
use crate::error::SyncResult;
use crate::value::FileValue;

/// Host application lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Going to the background; may be suspended.
    WillResignActive,
    /// Back in the foreground.
    DidBecomeActive,
    /// About to exit.
    WillTerminate,
}

impl LifecycleEvent {
    fn requires_commit(self) -> bool {
        matches!(self, Self::WillResignActive | Self::WillTerminate)
    }
}

/// Anything that can flush its pending state on demand.
#[async_trait]
pub trait Committable: Send + Sync {
    async fn commit(&self) -> SyncResult<()>;
}

#[async_trait]
impl<C: Committable + ?Sized> Committable for Arc<C> {
    async fn commit(&self) -> SyncResult<()> {
        (**self).commit().await
    }
}

/// Weak, type-erased reference to a registered handle.
pub struct Registration {
    upgrade: Box<dyn Fn() -> Option<Box<dyn Committable>> + Send + Sync>,
}

impl Registration {
    /// `upgrade` returns a live handle, or `None` once the target is gone.
    pub fn new<F>(upgrade: F) -> Self
    where
        F: Fn() -> Option<Box<dyn Committable>> + Send + Sync + 'static,
    {
        Self {
            upgrade: Box::new(upgrade),
        }
    }

    fn upgrade(&self) -> Option<Box<dyn Committable>> {
        (self.upgrade)()
    }
}

/// Handles a [`LifecycleSweeper`] can hold without keeping them alive.
///
/// The shared handles implement this over their own shared state, so any
/// clone keeps the registration alive.
pub trait Sweepable: Committable {
    fn registration(&self) -> Registration;
}

impl<C: Committable + ?Sized + 'static> Sweepable for Arc<C> {
    fn registration(&self) -> Registration {
        let weak: Weak<C> = Arc::downgrade(self);
        Registration::new(move || weak.upgrade().map(|item| Box::new(item) as Box<dyn Committable>))
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Committable for FileCoordinator<T> {
    async fn commit(&self) -> SyncResult<()> {
        FileCoordinator::commit(self).await
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Committable for FileValue<T> {
    async fn commit(&self) -> SyncResult<()> {
        FileValue::commit(self).await
    }
}

#[async_trait]
impl<T> Committable for DirectoryCoordinator<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    async fn commit(&self) -> SyncResult<()> {
        DirectoryCoordinator::commit(self).await
    }
}

/// Commits registered values when the host is about to go inactive.
///
/// Registrations are weak: dropping the last handle of a value unregisters it.
#[derive(Default)]
pub struct LifecycleSweeper {
    registered: Mutex<Vec<Registration>>,
}

impl LifecycleSweeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register<S: Sweepable + ?Sized>(&self, item: &S) {
        self.registered.lock().push(item.registration());
    }

    /// Number of registrations still alive.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit every live registration, in registration order.
    ///
    /// Failures are logged; returns how many commits succeeded.
    pub async fn sweep(&self) -> usize {
        let live = self.live();

        let mut committed = 0;
        for item in &live {
            match item.commit().await {
                Ok(()) => committed += 1,
                Err(e) => tracing::warn!(error = %e, "commit during lifecycle sweep failed"),
            }
        }
        tracing::debug!(committed, total = live.len(), "lifecycle sweep");
        committed
    }

    /// Upgrade every registration, pruning the dead ones.
    fn live(&self) -> Vec<Box<dyn Committable>> {
        let mut registered = self.registered.lock();
        let mut live = Vec::with_capacity(registered.len());
        registered.retain(|registration| match registration.upgrade() {
            Some(item) => {
                live.push(item);
                true
            }
            None => false,
        });
        live
    }

    /// Sweep on every commit-worthy event until the channel closes or the
    /// host terminates.
    pub fn spawn(self: &Arc<Self>, mut events: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        let sweeper = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "lifecycle events lagged, sweeping anyway");
                        LifecycleEvent::WillResignActive
                    }
                    Err(RecvError::Closed) => break,
                };
                if !event.requires_commit() {
                    continue;
                }
                let Some(sweeper) = sweeper.upgrade() else {
                    break;
                };
                tracing::info!(?event, "lifecycle sweep");
                sweeper.sweep().await;
                if event == LifecycleEvent::WillTerminate {
                    break;
                }
            }
        })
    }
}
