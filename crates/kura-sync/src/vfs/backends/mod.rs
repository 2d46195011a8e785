//! File system backends.

mod local;
mod memory;

pub use local::LocalFs;
pub use memory::MemoryFs;
