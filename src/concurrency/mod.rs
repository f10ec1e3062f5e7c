pub mod folder;
pub mod registry;

pub use folder::{FileLockGuard, FolderConcurrency, FullScanGuard, LockError};
pub use registry::FolderRegistry;
