pub mod memory_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{FlowOutcome, FlowReport};

/// Trait for keeping flow reports around for diagnostics.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store a finished run's report (replacing one with the same run id).
    async fn save(&self, report: &FlowReport) -> Result<()>;

    /// Get a report by run id.
    async fn get(&self, run_id: &str) -> Result<FlowReport>;

    /// List reports, newest first, optionally filtered by outcome.
    async fn list(&self, outcome: Option<FlowOutcome>) -> Result<Vec<FlowReport>>;

    /// Delete a report.
    async fn delete(&self, run_id: &str) -> Result<()>;
}
