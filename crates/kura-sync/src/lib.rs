//! kura sync engine.
//!
//! Keeps in-memory values in sync with files: a single value with a single
//! file ([`FileValue`]), or an identified collection with a directory holding
//! one file per item ([`DirectoryCoordinator`]).
//!
//! # Architecture
//!
//! ```text
//!  client ── get/set ──▶ DirectoryCoordinator ── diff ──▶ EditScript
//!                             │   (kura-types)
//!                             │ one per item
//!                             ▼
//!                       FileCoordinator ── debounced flush ──▶ FileSystem
//!                             ▲                                  (LocalFs / MemoryFs)
//!                             │ reload
//!  ChangeSource ──▶ DirectoryObserver ──▶ Observation handler
//!  (notify / manual)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = SyncConfig::load(Path::new("kura.ron"))?;
//! let observer = DirectoryObserver::new(Arc::new(NotifySource::new(&config)), &config);
//! let resolver = ExtensionResolver::<Task>::new(JsonCodec::pretty())
//!     .with_recovery(ReadRecovery::Propagate);
//! let tasks = DirectoryCoordinator::observed(
//!     "/var/lib/app/tasks",
//!     Arc::new(LocalFs::new()),
//!     Arc::new(resolver),
//!     &observer,
//!     config,
//! )?;
//!
//! let mut snapshot = tasks.get().await?;
//! snapshot.insert(Task::new("water the plants"));
//! tasks.set(snapshot).await?;
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod flows;
pub mod layout;
pub mod lifecycle;
pub mod value;
pub mod vfs;
pub mod watch;

pub use cache::{SlotCache, ValueCache, WeakCache};
pub use codec::{Codec, CodecError, JsonCodec, PostcardCodec, RonCodec, SharedCodec, TextCodec};
pub use config::SyncConfig;
pub use coordinator::{ChangeFeed, FileCoordinator, StateFlags};
pub use directory::DirectoryCoordinator;
pub use error::{FileCause, SyncError, SyncResult};
pub use flows::{ChangeNotice, ChangeOrigin, NoticeBus, Observable};
pub use layout::{ExtensionResolver, FileConfiguration, FileResolver, InitialValue, ReadRecovery};
pub use lifecycle::{Committable, LifecycleEvent, LifecycleSweeper, Registration, Sweepable};
pub use value::FileValue;
pub use vfs::{FileSystem, LocalFs, MemoryFs, VfsError, VfsResult};
pub use watch::{
    ChangeEvent, ChangeHandler, ChangeKind, ChangeSource, DirectoryObserver, ManualSource,
    NotifySource, Observation, ObserveOptions,
};

pub use kura_types::{diff, EditScript, Identifiable, Snapshot, ValueIdentity};
