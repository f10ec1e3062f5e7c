use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key-value results a node hands to its dependents.
pub type ReturnValues = HashMap<String, serde_json::Value>;

/// Outcome of a single node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecStatus::Success => write!(f, "SUCCESS"),
            ExecStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// The value passed along graph edges: status, returned values and error text.
///
/// Fields are private so a result cannot change after a node produced it.
/// `error` is only ever non-empty for failed results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    exec_status: ExecStatus,
    #[serde(default)]
    return_val: ReturnValues,
    #[serde(default)]
    error: String,
}

impl NodeResult {
    pub fn success(return_val: ReturnValues) -> Self {
        Self {
            exec_status: ExecStatus::Success,
            return_val,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::failed_with(error, ReturnValues::new())
    }

    /// A failed result that still carries diagnostic values (e.g. an exit code).
    pub fn failed_with(error: impl Into<String>, return_val: ReturnValues) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "node failed without an error message".to_string();
        }
        Self {
            exec_status: ExecStatus::Failed,
            return_val,
            error,
        }
    }

    pub fn exec_status(&self) -> ExecStatus {
        self.exec_status
    }

    pub fn is_success(&self) -> bool {
        self.exec_status == ExecStatus::Success
    }

    pub fn return_val(&self) -> &ReturnValues {
        &self.return_val
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.return_val.get(key)
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn into_return_val(self) -> ReturnValues {
        self.return_val
    }
}

/// Reported status of a node within a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Success => write!(f, "success"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Overall result of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowOutcome {
    Success,
    Failed,
    /// Nothing failed, but some nodes were skipped because their file stayed locked.
    Partial,
}

impl std::fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowOutcome::Success => write!(f, "SUCCESS"),
            FlowOutcome::Failed => write!(f, "FAILED"),
            FlowOutcome::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// What the executor does when a node's file lock cannot be taken in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockContentionPolicy {
    /// Fail the node with the lock timeout.
    #[default]
    Fail,
    /// Skip the node; the run ends PARTIAL if nothing else failed.
    Skip,
    /// Spend the node's retry budget waiting again, then fail.
    Retry,
}

impl std::str::FromStr for LockContentionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(LockContentionPolicy::Fail),
            "skip" => Ok(LockContentionPolicy::Skip),
            "retry" => Ok(LockContentionPolicy::Retry),
            other => anyhow::bail!("Invalid lock contention policy '{}'. Use: fail, skip, retry", other),
        }
    }
}

/// Why a node did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped.
    Dependency { dependency: String, status: NodeStatus },
    /// The node's file stayed locked past the timeout.
    LockContention { file_id: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Dependency { dependency, status } => {
                write!(f, "dependency '{}' {}", dependency, status)
            }
            SkipReason::LockContention { file_id } => {
                write!(f, "lock contention on '{}'", file_id)
            }
        }
    }
}

/// Retry configuration for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial backoff duration in seconds (doubles each attempt).
    pub backoff_s: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_s: 1.0,
        }
    }
}

/// Which file a node touches, and therefore which lock it must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTarget {
    /// The file named by the change notification that triggered the run.
    TriggerFile,
    /// A fixed file id within the trigger's folder.
    File(String),
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    /// Registered implementation name, resolved at validation time.
    pub implementation: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
    /// Run even when a dependency failed or was skipped.
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockTarget>,
}

impl NodeDefinition {
    pub fn new(name: &str, implementation: &str) -> Self {
        Self {
            name: name.to_string(),
            implementation: implementation.to_string(),
            config: serde_json::Value::Null,
            dependencies: Vec::new(),
            retry: RetryConfig::default(),
            timeout_s: None,
            continue_on_failure: false,
            lock: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_lock(mut self, lock: LockTarget) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn with_retry(mut self, max_retries: u32, backoff_s: f64) -> Self {
        self.retry = RetryConfig {
            max_retries,
            backoff_s,
        };
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_s = Some(seconds);
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }
}

/// A named graph of nodes; edges are given by each node's dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    /// Folders whose changes trigger this flow. Empty means every folder.
    #[serde(default)]
    pub folders: Vec<String>,
    pub nodes: Vec<NodeDefinition>,
}

impl FlowDefinition {
    pub fn new(name: &str, nodes: Vec<NodeDefinition>) -> Self {
        Self {
            name: name.to_string(),
            folders: Vec::new(),
            nodes,
        }
    }

    /// Parse a flow from YAML (or JSON, which YAML accepts).
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let flow: FlowDefinition =
            serde_yml::from_str(source).context("Failed to parse flow definition")?;
        Ok(flow)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file: {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Failed to load flow: {}", path.display()))
    }

    pub fn node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn watches_folder(&self, folder_id: &str) -> bool {
        self.folders.is_empty() || self.folders.iter().any(|f| f == folder_id)
    }
}

/// Change notification that starts flow runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderChange {
    pub folder_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl FolderChange {
    pub fn folder(folder_id: &str) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            file_id: None,
        }
    }

    pub fn file(folder_id: &str, file_id: &str) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            file_id: Some(file_id.to_string()),
        }
    }
}

/// What a node implementation sees when it runs.
#[derive(Debug, Clone)]
pub struct NodeInputs {
    pub trigger: FolderChange,
    /// Results of the node's declared dependencies, keyed by node name.
    pub dependencies: HashMap<String, NodeResult>,
}

impl NodeInputs {
    pub fn new(trigger: FolderChange) -> Self {
        Self {
            trigger,
            dependencies: HashMap::new(),
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&NodeResult> {
        self.dependencies.get(name)
    }
}

/// Per-node entry of a flow report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub implementation: String,
    pub status: NodeStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<NodeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
}

impl NodeReport {
    pub fn skipped(node: &NodeDefinition, reason: SkipReason) -> Self {
        Self {
            name: node.name.clone(),
            implementation: node.implementation.clone(),
            status: NodeStatus::Skipped,
            attempts: 0,
            result: None,
            skip_reason: Some(reason),
            started: None,
            finished: None,
        }
    }

    /// Report for a node that ran (possibly several times) and produced `result`.
    pub fn finished(
        node: &NodeDefinition,
        result: NodeResult,
        attempts: u32,
        started: DateTime<Utc>,
    ) -> Self {
        let status = if result.is_success() {
            NodeStatus::Success
        } else {
            NodeStatus::Failed
        };
        Self {
            name: node.name.clone(),
            implementation: node.implementation.clone(),
            status,
            attempts,
            result: Some(result),
            skip_reason: None,
            started: Some(started),
            finished: Some(Utc::now()),
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.result
            .as_ref()
            .filter(|r| !r.is_success())
            .map(|r| r.error())
    }
}

/// Everything a caller needs to know about one flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReport {
    pub run_id: String,
    pub flow_name: String,
    pub trigger: FolderChange,
    pub outcome: FlowOutcome,
    /// Error of the first failing node, in plan order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Node reports in plan order.
    pub nodes: Vec<NodeReport>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl FlowReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }
}
