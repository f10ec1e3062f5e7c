//! Flow engine for file synchronization and backup.
//!
//! A flow is a graph of nodes driving external copy, snapshot and peer-sync
//! tools. Flows are validated once ([`engine::validate`]), executed by
//! [`engine::FlowExecutor`] with per-file locking from [`concurrency`], and
//! triggered by file events derived in [`events`].

pub mod backends;
pub mod cli;
pub mod concurrency;
pub mod engine;
pub mod error;
pub mod events;
pub mod nodes;
pub mod storage;
