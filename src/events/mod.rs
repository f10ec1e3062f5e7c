//! File-event tracking: checksums, the append-only event chain, and the
//! detector that feeds it from disk.

pub mod chain;
pub mod checksum;
pub mod detector;
pub mod types;

pub use chain::{EventChain, FileEventTracker, decide};
pub use detector::ChangeDetector;
pub use types::*;
