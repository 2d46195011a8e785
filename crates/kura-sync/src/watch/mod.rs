//! External change notification.
//!
//! ```text
//!   ChangeSource (notify / manual)
//!        │  Vec<ChangeEvent> per directory
//!        ▼
//!   DirectoryObserver ── one watch per directory, refcounted
//!        │  filtered, non-empty batches
//!        ▼
//!   Observation handler (FileValue / DirectoryCoordinator reload)
//! ```
//!
//! While a coordinator mutates its own files it wraps the work in
//! [`Observation::disable_and_perform`], so the notifications for those writes
//! are swallowed instead of triggering a reload.

mod observer;
mod source;

pub use observer::{ChangeHandler, DirectoryObserver, Observation, ObserveOptions};
pub use source::{ChangeEvent, ChangeKind, ChangeSource, ChangeStream, ManualSource, NotifySource};
