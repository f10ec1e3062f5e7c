use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{error, info};

use crate::engine::executor::FlowExecutor;
use crate::engine::types::{FlowDefinition, FlowReport, FolderChange};
use crate::engine::validator::ExecutionPlan;
use crate::error::{DefinitionError, SyncError, ValidationError};
use crate::events::{ChangeDetector, FileEventDto, FileEventTracker};
use crate::storage::ReportStore;

/// What happened to a change notification.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A full scan of the folder is running; per-file work was not started.
    Deferred,
    /// Nothing changed on disk, so no flow ran.
    NoChange,
    /// Events were recorded and the bound flows ran once per changed file.
    Executed {
        events: Vec<FileEventDto>,
        reports: Vec<FlowReport>,
    },
}

/// Wires change notifications to the event chain and the flows bound to
/// each folder.
pub struct SyncOrchestrator {
    executor: FlowExecutor,
    detector: ChangeDetector,
    store: Arc<dyn ReportStore>,
    plans: RwLock<Vec<ExecutionPlan>>,
    roots: RwLock<HashMap<String, PathBuf>>,
}

impl SyncOrchestrator {
    pub fn new(executor: FlowExecutor, store: Arc<dyn ReportStore>) -> Self {
        let detector = ChangeDetector::new(
            executor.folders().clone(),
            Arc::new(FileEventTracker::new()),
        )
        .with_lock_timeout(executor.settings().lock_timeout);

        Self {
            executor,
            detector,
            store,
            plans: RwLock::new(Vec::new()),
            roots: RwLock::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<FileEventTracker> {
        self.detector.tracker()
    }

    pub fn executor(&self) -> &FlowExecutor {
        &self.executor
    }

    /// Register a folder and the directory it lives in.
    pub fn register_folder(&self, folder_id: &str, root: &Path) -> Result<(), ValidationError> {
        self.executor.folders().register(folder_id)?;
        self.roots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(folder_id.to_string(), root.to_path_buf());
        Ok(())
    }

    pub fn unregister_folder(&self, folder_id: &str) {
        self.executor.folders().unregister(folder_id);
        self.roots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(folder_id);
    }

    /// Validate a flow once and keep its plan for every later trigger.
    pub fn add_flow(&self, flow: &FlowDefinition) -> Result<(), DefinitionError> {
        let plan = self.executor.validate(flow)?;
        info!(flow = %flow.name, nodes = plan.len(), "Flow registered");
        self.plans
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(plan);
        Ok(())
    }

    /// Handle a change notification for a folder (and optionally one file).
    pub async fn handle_change(&self, change: FolderChange) -> Result<TriggerOutcome, SyncError> {
        let folder = self.executor.folders().get(&change.folder_id)?;
        let root = self.root(&change.folder_id)?;

        let events = match &change.file_id {
            Some(file_id) => {
                if folder.is_full_scan() {
                    info!(folder = %change.folder_id, file_id = %file_id, "Full scan running; change deferred");
                    return Ok(TriggerOutcome::Deferred);
                }
                self.detector
                    .observe_file(&change.folder_id, &root, file_id)
                    .await?
                    .into_iter()
                    .collect::<Vec<_>>()
            }
            None => self.detector.scan_folder(&change.folder_id, &root).await?,
        };

        if events.is_empty() {
            return Ok(TriggerOutcome::NoChange);
        }

        let plans: Vec<ExecutionPlan> = self
            .plans
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.flow().watches_folder(&change.folder_id))
            .cloned()
            .collect();

        let mut reports = Vec::new();
        for event in &events {
            let trigger = FolderChange::file(&event.folder_id, &event.file_id);
            for plan in &plans {
                let report = self.executor.execute(plan, trigger.clone()).await;
                if let Err(e) = self.store.save(&report).await {
                    error!(run_id = %report.run_id, error = %e, "Failed to store flow report");
                }
                reports.push(report);
            }
        }

        Ok(TriggerOutcome::Executed { events, reports })
    }

    fn root(&self, folder_id: &str) -> Result<PathBuf, ValidationError> {
        self.roots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(folder_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownFolder {
                folder_id: folder_id.to_string(),
            })
    }
}
