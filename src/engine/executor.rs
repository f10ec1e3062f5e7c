use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::concurrency::{FileLockGuard, FolderRegistry, LockError};
use crate::engine::types::*;
use crate::engine::validator::{ExecutionPlan, dependents_of, validate};
use crate::error::{DefinitionError, ExecutionError};
use crate::nodes::{Node, NodeRegistry};

/// Tunables for flow execution.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Upper bound on nodes running at once within one flow run.
    pub max_concurrent_nodes: usize,
    /// How long a node waits for its file lock.
    pub lock_timeout: Duration,
    pub lock_contention: LockContentionPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        let max_concurrent_nodes = std::env::var("SYNCFLOW_MAX_CONCURRENT_NODES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or_else(num_cpus::get);

        Self {
            max_concurrent_nodes,
            lock_timeout: Duration::from_secs(30),
            lock_contention: LockContentionPolicy::Fail,
        }
    }
}

/// Runs validated flows. Cheap to clone; clones share the registry and the
/// folder lock tables.
#[derive(Clone)]
pub struct FlowExecutor {
    registry: Arc<NodeRegistry>,
    folders: Arc<FolderRegistry>,
    settings: ExecutorSettings,
}

/// Why a node could not get its lock.
enum NodeLockError {
    Contention { file_id: String, error: ExecutionError },
    Invalid(String),
}

impl FlowExecutor {
    pub fn new(registry: Arc<NodeRegistry>, folders: Arc<FolderRegistry>) -> Self {
        Self {
            registry,
            folders,
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn folders(&self) -> &Arc<FolderRegistry> {
        &self.folders
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn validate(&self, flow: &FlowDefinition) -> Result<ExecutionPlan, DefinitionError> {
        validate(flow, &self.registry)
    }

    /// Validate then execute. Definition errors abort before any node runs.
    pub async fn run(
        &self,
        flow: &FlowDefinition,
        trigger: FolderChange,
    ) -> Result<FlowReport, DefinitionError> {
        let plan = self.validate(flow)?;
        Ok(self.execute(&plan, trigger).await)
    }

    /// Execute a validated plan.
    ///
    /// Node failures never abort the run: they become failed results, and
    /// everything downstream of them is skipped.
    pub async fn execute(&self, plan: &ExecutionPlan, trigger: FolderChange) -> FlowReport {
        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now();

        info!(
            run_id = %run_id,
            flow = %plan.name(),
            folder = %trigger.folder_id,
            file_id = trigger.file_id.as_deref().unwrap_or("-"),
            "Starting flow execution"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_nodes.max(1)));
        let mut reports: HashMap<String, NodeReport> = HashMap::new();

        for phase in plan.phases() {
            let mut handles = Vec::new();

            for node in phase {
                if let Some(reason) = skip_reason(node, &reports) {
                    warn!(node = %node.name, reason = %reason, "Skipping node");
                    reports.insert(node.name.clone(), NodeReport::skipped(node, reason));
                    continue;
                }

                // Nodes only see the results of their own dependencies
                let mut inputs = NodeInputs::new(trigger.clone());
                for dep in &node.dependencies {
                    if let Some(result) = reports.get(dep).and_then(|r| r.result.clone()) {
                        inputs.dependencies.insert(dep.clone(), result);
                    }
                }

                let executor = self.clone();
                let semaphore = semaphore.clone();
                let node = node.clone();
                let name = node.name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return NodeReport::finished(
                                &node,
                                NodeResult::failed("executor shut down"),
                                0,
                                Utc::now(),
                            );
                        }
                    };
                    executor.run_node(&node, inputs).await
                });
                handles.push((name, handle));
            }

            // Wait for the whole phase before starting the next
            for (name, handle) in handles {
                let report = match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(node = %name, error = %e, "Node task panicked");
                        let node = plan.flow().node(&name).cloned().unwrap_or_else(|| {
                            NodeDefinition::new(&name, "unknown")
                        });
                        NodeReport::finished(
                            &node,
                            NodeResult::failed(format!("Node '{}' panicked: {}", name, e)),
                            1,
                            started,
                        )
                    }
                };
                if report.status == NodeStatus::Failed {
                    let downstream = dependents_of(plan, &name);
                    if !downstream.is_empty() {
                        warn!(node = %name, downstream = downstream.len(), "Node failed; dependents will not run unless marked continue_on_failure");
                    }
                }
                reports.insert(name, report);
            }
        }

        let nodes: Vec<NodeReport> = plan
            .nodes()
            .filter_map(|n| reports.remove(&n.name))
            .collect();

        let (outcome, error) = summarize(&nodes);

        match outcome {
            FlowOutcome::Failed => error!(
                run_id = %run_id,
                flow = %plan.name(),
                error = error.as_deref().unwrap_or(""),
                "Flow execution failed"
            ),
            _ => info!(run_id = %run_id, flow = %plan.name(), outcome = %outcome, "Flow execution complete"),
        }

        FlowReport {
            run_id,
            flow_name: plan.name().to_string(),
            trigger,
            outcome,
            error,
            nodes,
            started,
            finished: Utc::now(),
        }
    }

    /// Run a single node with lock, timeout and retry handling.
    async fn run_node(&self, node: &NodeDefinition, inputs: NodeInputs) -> NodeReport {
        let started = Utc::now();

        let Some(implementation) = self.registry.get(&node.implementation) else {
            // Only reachable if the registry changed after validation
            let result = NodeResult::failed(format!(
                "Unknown node implementation: {}",
                node.implementation
            ));
            return NodeReport::finished(node, result, 0, started);
        };

        let max_attempts = node.retry.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(node = %node.name, attempt = attempt, max = max_attempts, "Running node");

            let guard = match self.lock_for(node, &inputs.trigger).await {
                Ok(guard) => guard,
                Err(NodeLockError::Invalid(message)) => {
                    error!(node = %node.name, error = %message, "Node lock target is invalid");
                    return NodeReport::finished(node, NodeResult::failed(message), attempt, started);
                }
                Err(NodeLockError::Contention { file_id, error }) => {
                    warn!(node = %node.name, file_id = %file_id, "Lock contention");
                    match self.settings.lock_contention {
                        LockContentionPolicy::Skip => {
                            let mut report =
                                NodeReport::skipped(node, SkipReason::LockContention { file_id });
                            report.attempts = attempt;
                            report.started = Some(started);
                            report.finished = Some(Utc::now());
                            return report;
                        }
                        LockContentionPolicy::Retry if attempt < max_attempts => {
                            self.backoff(node, attempt).await;
                            continue;
                        }
                        _ => {
                            let result = NodeResult::failed(error.to_string());
                            return NodeReport::finished(node, result, attempt, started);
                        }
                    }
                }
            };

            let result = self
                .invoke(node, implementation.as_ref(), inputs.clone())
                .await;
            drop(guard);

            if result.is_success() {
                info!(node = %node.name, "Node completed successfully");
                return NodeReport::finished(node, result, attempt, started);
            }

            warn!(node = %node.name, attempt = attempt, error = %result.error(), "Node attempt failed");
            if attempt >= max_attempts {
                return NodeReport::finished(node, result, attempt, started);
            }
            self.backoff(node, attempt).await;
        }
    }

    /// Call the implementation, folding errors and timeouts into a failed result.
    async fn invoke(
        &self,
        node: &NodeDefinition,
        implementation: &dyn Node,
        inputs: NodeInputs,
    ) -> NodeResult {
        let call = implementation.execute(&node.config, inputs);

        let outcome = match node.timeout_s {
            Some(seconds) => {
                let duration = Duration::from_secs_f64(seconds.max(0.0));
                match tokio::time::timeout(duration, call).await {
                    Ok(r) => r,
                    Err(_) => Err(ExecutionError::Timeout {
                        node: node.name.clone(),
                        seconds,
                    }
                    .into()),
                }
            }
            None => call.await,
        };

        outcome.unwrap_or_else(|e| NodeResult::failed(format!("{:#}", e)))
    }

    /// Take the node's file lock, if it declares one.
    async fn lock_for(
        &self,
        node: &NodeDefinition,
        trigger: &FolderChange,
    ) -> Result<Option<FileLockGuard>, NodeLockError> {
        let file_id = match &node.lock {
            None => return Ok(None),
            Some(LockTarget::File(file_id)) => file_id.clone(),
            Some(LockTarget::TriggerFile) => trigger.file_id.clone().ok_or_else(|| {
                NodeLockError::Invalid(format!(
                    "Node '{}' locks the trigger file, but the trigger names no file",
                    node.name
                ))
            })?,
        };

        let folder = self
            .folders
            .get(&trigger.folder_id)
            .map_err(|e| NodeLockError::Invalid(e.to_string()))?;

        match folder
            .acquire_timeout(&file_id, self.settings.lock_timeout)
            .await
        {
            Ok(guard) => Ok(Some(guard)),
            Err(LockError::Timeout(error)) => Err(NodeLockError::Contention { file_id, error }),
            Err(LockError::Invalid(e)) => Err(NodeLockError::Invalid(e.to_string())),
        }
    }

    async fn backoff(&self, node: &NodeDefinition, attempt: u32) {
        let delay = node.retry.backoff_s.max(0.0) * 2.0_f64.powi((attempt - 1) as i32);
        info!(node = %node.name, delay_s = delay, "Retrying after backoff");
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }
}

/// A node is skipped when a dependency did not succeed, unless it opted in
/// to running anyway.
fn skip_reason(node: &NodeDefinition, reports: &HashMap<String, NodeReport>) -> Option<SkipReason> {
    if node.continue_on_failure {
        return None;
    }
    node.dependencies.iter().find_map(|dep| {
        let status = reports.get(dep).map(|r| r.status)?;
        (status != NodeStatus::Success).then(|| SkipReason::Dependency {
            dependency: dep.clone(),
            status,
        })
    })
}

/// Overall outcome plus the first failing node's error, in plan order.
fn summarize(nodes: &[NodeReport]) -> (FlowOutcome, Option<String>) {
    if let Some(failed) = nodes.iter().find(|n| n.status == NodeStatus::Failed) {
        let error = failed.error().unwrap_or_default().to_string();
        return (FlowOutcome::Failed, Some(error));
    }

    let contention = nodes.iter().any(|n| n.status == NodeStatus::Skipped);
    if contention {
        // Every skip traces back to a lock contention skip, since nothing failed
        (FlowOutcome::Partial, None)
    } else {
        (FlowOutcome::Success, None)
    }
}
