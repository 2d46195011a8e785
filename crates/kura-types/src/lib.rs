//! Identity, snapshot and diff types for kura.
//!
//! This crate is the pure foundation of the sync engine: it knows how items
//! are identified, how an ordered collection of them is held in memory, and
//! how two collections differ. It performs **no I/O**. Turning an
//! [`EditScript`] into file creates, deletes and writes is the job of
//! `kura-sync`.
//!
//! # Overview
//!
//! ```text
//! Snapshot<T> (old) ──┐
//!                     ├── diff() ──► EditScript { removed, inserted, renamed, updated }
//! Snapshot<T> (new) ──┘
//! ```
//!
//! |--------------------|-----------------------------------------------|
//! | Type               | Purpose                                       |
//! |--------------------|-----------------------------------------------|
//! | [`Identifiable`]   | Extracts the key (and value signature) of T   |
//! | [`ValueIdentity`]  | Hash / reference signature for renames        |
//! | [`Snapshot`]       | Ordered, identifier-indexed collection        |
//! | [`EditScript`]     | Minimal set of changes between two snapshots  |
//! |--------------------|-----------------------------------------------|

pub mod diff;
pub mod ids;
pub mod snapshot;

pub use diff::{diff, EditScript};
pub use ids::{Identifiable, ValueIdentity};
pub use snapshot::Snapshot;
