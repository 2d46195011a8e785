//! Change notices and the [`Observable`] facade.
//!
//! Synchronized values publish a [`ChangeNotice`] whenever their in-memory
//! value changes. The notice carries where the change came from, so a
//! subscriber that mirrors the value elsewhere can tell its own `set` calls
//! apart from edits made on disk:
//!
//! ```ignore
//! let mut notices = value.subscribe();
//! value.set(new_value).await?;
//! assert_eq!(notices.recv().await?.origin, ChangeOrigin::Local);
//! ```

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SyncResult;

// ============================================================================
// Origin Tracking
// ============================================================================

/// Where a change to a synchronized value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChangeOrigin {
    /// A client called `set`.
    #[default]
    Local,
    /// The file system changed and the value was reloaded.
    External,
}

/// Published after a synchronized value changed.
#[derive(Clone, Debug)]
pub struct ChangeNotice {
    pub origin: ChangeOrigin,
    pub timestamp: Instant,
}

impl ChangeNotice {
    pub fn new(origin: ChangeOrigin) -> Self {
        Self {
            origin,
            timestamp: Instant::now(),
        }
    }
}

// ============================================================================
// NoticeBus
// ============================================================================

/// Broadcast channel for change notices.
#[derive(Debug)]
pub struct NoticeBus {
    tx: broadcast::Sender<ChangeNotice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notice. Having no subscribers is not an error.
    pub fn publish(&self, origin: ChangeOrigin) {
        let receivers = self.tx.send(ChangeNotice::new(origin)).unwrap_or(0);
        tracing::trace!(?origin, receivers, "change notice");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// Observable
// ============================================================================

/// A value that can be read, replaced, and watched for changes.
#[async_trait]
pub trait Observable<T>: Send + Sync {
    /// The current value.
    async fn get(&self) -> SyncResult<T>;

    /// Replace the value and persist it.
    async fn set(&self, value: T) -> SyncResult<()>;

    /// Notices published after every change, local or external.
    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice>;
}
