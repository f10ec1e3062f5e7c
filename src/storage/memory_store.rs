use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{FlowOutcome, FlowReport};
use crate::storage::ReportStore;

/// In-memory report store. Holds reports only for the lifetime of the
/// process, up to `capacity` entries (oldest evicted first).
pub struct MemoryReportStore {
    reports: Mutex<HashMap<String, FlowReport>>,
    capacity: usize,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            reports: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn reports(&self) -> std::sync::MutexGuard<'_, HashMap<String, FlowReport>> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save(&self, report: &FlowReport) -> Result<()> {
        let mut reports = self.reports();
        reports.insert(report.run_id.clone(), report.clone());

        while reports.len() > self.capacity {
            let oldest = reports
                .values()
                .min_by_key(|r| r.finished)
                .map(|r| r.run_id.clone());
            match oldest {
                Some(run_id) => {
                    reports.remove(&run_id);
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<FlowReport> {
        self.reports()
            .get(run_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))
    }

    async fn list(&self, outcome: Option<FlowOutcome>) -> Result<Vec<FlowReport>> {
        let mut runs: Vec<FlowReport> = self
            .reports()
            .values()
            .filter(|r| outcome.is_none_or(|o| r.outcome == o))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started.cmp(&a.started));
        Ok(runs)
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        self.reports().remove(run_id);
        Ok(())
    }
}
