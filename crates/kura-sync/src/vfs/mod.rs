//! File system abstraction.
//!
//! The sync engine never touches `std::fs` or `tokio::fs` directly; every read,
//! write, listing and delete goes through [`FileSystem`]:
//!
//! - [`LocalFs`] - the real disk, with crash-safe (temp file + rename) writes
//! - [`MemoryFs`] - in-memory, with per-path write counters for tests
//!
//! ## Design Decisions
//!
//! - **Whole-file I/O**: one item is one file, so reads and writes move the
//!   full contents. No offsets, no handles.
//! - **Paths as given**: backends do not re-root paths; coordinators hold the
//!   absolute paths that change notifications report.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::{LocalFs, MemoryFs};
pub use error::{VfsError, VfsResult};
pub use ops::FileSystem;
pub use types::{DirEntry, FileAttr, FileType};
