//! Virtual filesystem
//!
//! A flat, persisted workspace plus the operations that mirror it into and
//! out of an interpreter's hierarchical filesystem.

pub mod host;
pub mod mirror;
pub mod path;
pub mod storage;
pub mod store;

pub use host::{DirFs, FsError, HostFs, MemFs};
pub use mirror::{MountReport, SyncReport};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use store::VirtualFs;
