//! Interfaces to the external engines, and the adapter that turns their
//! outcomes into node results.

pub mod command;
pub mod mirror;
pub mod peer;
pub mod result;
pub mod snapshot;

pub use command::{CommandSpec, run_command};
pub use mirror::{CopyRequest, MirrorBackend, PathPair, TransferStat};
pub use peer::{PeerSyncBackend, StorageAvailability, StoragePathStatus};
pub use result::{CommandResult, NO_EXIT_CODE, settle};
pub use snapshot::{SnapshotBackend, SnapshotCommand, SnapshotStats};
