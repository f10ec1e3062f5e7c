//! Integration tests for flow execution: ordering, failure propagation,
//! retries, timeouts and lock handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use syncflow::concurrency::FolderRegistry;
use syncflow::engine::types::*;
use syncflow::engine::{ExecutorSettings, FlowExecutor};
use syncflow::error::DefinitionError;
use syncflow::nodes::{Node, NodeRegistry};

/// Succeeds, recording how many times it ran.
struct CountingNode {
    name: &'static str,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for CountingNode {
    fn node_type(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test node"
    }

    async fn execute(&self, _config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut values = ReturnValues::new();
        values.insert("deps_seen".to_string(), inputs.dependencies.len().into());
        Ok(NodeResult::success(values))
    }
}

/// Fails the first `failures` calls, then succeeds.
struct FlakyNode {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for FlakyNode {
    fn node_type(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "fails a few times"
    }

    async fn execute(&self, _config: &serde_json::Value, _inputs: NodeInputs) -> Result<NodeResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Ok(NodeResult::failed(format!("attempt {} failed", n + 1)))
        } else {
            Ok(NodeResult::success(ReturnValues::new()))
        }
    }
}

struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    fn node_type(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn execute(&self, config: &serde_json::Value, _inputs: NodeInputs) -> Result<NodeResult> {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("boom");
        anyhow::bail!("{}", message)
    }
}

/// Tracks the peak number of concurrent executions.
struct OverlapCounter {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for OverlapCounter {
    fn node_type(&self) -> &str {
        "overlap"
    }

    fn description(&self) -> &str {
        "records overlap"
    }

    async fn execute(&self, _config: &serde_json::Value, _inputs: NodeInputs) -> Result<NodeResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(NodeResult::success(ReturnValues::new()))
    }
}

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        max_concurrent_nodes: 4,
        lock_timeout: Duration::from_millis(100),
        lock_contention: LockContentionPolicy::Fail,
    }
}

fn executor_with(registry: NodeRegistry) -> FlowExecutor {
    let folders = Arc::new(FolderRegistry::new());
    folders.register("photos").unwrap();
    FlowExecutor::new(Arc::new(registry), folders).with_settings(settings())
}

fn executor() -> FlowExecutor {
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(FailingNode));
    executor_with(registry)
}

// --- Basic execution ---

#[tokio::test]
async fn single_node_succeeds() {
    let flow = FlowDefinition::new(
        "single",
        vec![NodeDefinition::new("greet", "log").with_config(json!({"message": "hello"}))],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Success);
    assert!(report.error.is_none());
    let greet = report.node("greet").unwrap();
    assert_eq!(greet.status, NodeStatus::Success);
    assert_eq!(greet.attempts, 1);
    assert_eq!(
        greet.result.as_ref().unwrap().get("log_message"),
        Some(&json!("hello"))
    );
}

#[tokio::test]
async fn dependency_results_flow_downstream() {
    let flow = FlowDefinition::new(
        "chain",
        vec![
            NodeDefinition::new("first", "log").with_config(json!({"message": "abc"})),
            NodeDefinition::new("second", "log")
                .depends_on(&["first"])
                .with_config(json!({"message": "got ${deps.first.log_message} for ${trigger.file_id}"})),
        ],
    );

    let report = executor()
        .run(&flow, FolderChange::file("photos", "a.jpg"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Success);
    let second = report.node("second").unwrap();
    assert_eq!(
        second.result.as_ref().unwrap().get("log_message"),
        Some(&json!("got abc for a.jpg"))
    );
}

#[tokio::test]
async fn invalid_flow_never_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(CountingNode {
        name: "count",
        calls: calls.clone(),
    }));

    let flow = FlowDefinition::new(
        "bad",
        vec![
            NodeDefinition::new("ok", "count"),
            NodeDefinition::new("x", "count").depends_on(&["y"]),
            NodeDefinition::new("y", "count").depends_on(&["x"]),
        ],
    );

    let err = executor_with(registry)
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap_err();
    assert!(matches!(err, DefinitionError::CyclicDependency { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// --- Failure propagation ---

#[tokio::test]
async fn failed_snapshot_skips_verify() {
    let flow = FlowDefinition::new(
        "backup",
        vec![
            NodeDefinition::new("snapshot", "fail")
                .with_config(json!({"message": "repository locked"})),
            NodeDefinition::new("verify", "log").depends_on(&["snapshot"]),
        ],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Failed);
    assert!(report.error.as_deref().unwrap().contains("repository locked"));

    let snapshot = report.node("snapshot").unwrap();
    assert_eq!(snapshot.status, NodeStatus::Failed);
    assert_eq!(
        snapshot.result.as_ref().unwrap().exec_status(),
        ExecStatus::Failed
    );

    let verify = report.node("verify").unwrap();
    assert_eq!(verify.status, NodeStatus::Skipped);
    assert!(verify.result.is_none());
    assert_eq!(
        verify.skip_reason,
        Some(SkipReason::Dependency {
            dependency: "snapshot".to_string(),
            status: NodeStatus::Failed,
        })
    );
}

#[tokio::test]
async fn skips_cascade_transitively() {
    let flow = FlowDefinition::new(
        "cascade",
        vec![
            NodeDefinition::new("a", "fail"),
            NodeDefinition::new("b", "log").depends_on(&["a"]),
            NodeDefinition::new("c", "log").depends_on(&["b"]),
            NodeDefinition::new("independent", "log"),
        ],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.node("b").unwrap().status, NodeStatus::Skipped);
    assert_eq!(
        report.node("c").unwrap().skip_reason,
        Some(SkipReason::Dependency {
            dependency: "b".to_string(),
            status: NodeStatus::Skipped,
        })
    );
    assert_eq!(
        report.node("independent").unwrap().status,
        NodeStatus::Success
    );
    assert_eq!(report.nodes.len(), 4);
}

#[tokio::test]
async fn continue_on_failure_runs_cleanup() {
    let flow = FlowDefinition::new(
        "cleanup",
        vec![
            NodeDefinition::new("copy", "fail"),
            NodeDefinition::new("notify", "log")
                .depends_on(&["copy"])
                .continue_on_failure()
                .with_config(json!({"message": "copy done"})),
        ],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Failed);
    assert_eq!(report.node("notify").unwrap().status, NodeStatus::Success);
}

#[tokio::test]
async fn first_failure_in_order_is_reported() {
    let flow = FlowDefinition::new(
        "two_failures",
        vec![
            NodeDefinition::new("early", "fail").with_config(json!({"message": "early"})),
            NodeDefinition::new("mid", "log").depends_on(&["early"]).continue_on_failure(),
            NodeDefinition::new("late", "fail")
                .depends_on(&["mid"])
                .with_config(json!({"message": "late"})),
        ],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Failed);
    assert!(report.error.as_deref().unwrap().contains("early"));
    assert_eq!(report.node("late").unwrap().status, NodeStatus::Failed);
}

// --- Retry and timeout ---

#[tokio::test]
async fn retry_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(FlakyNode {
        failures: 2,
        calls: calls.clone(),
    }));

    let flow = FlowDefinition::new(
        "retry",
        vec![NodeDefinition::new("upload", "flaky").with_retry(3, 0.01)],
    );

    let report = executor_with(registry)
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Success);
    assert_eq!(report.node("upload").unwrap().attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_exhausted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(FlakyNode {
        failures: 10,
        calls: calls.clone(),
    }));

    let flow = FlowDefinition::new(
        "retry",
        vec![NodeDefinition::new("upload", "flaky").with_retry(1, 0.01)],
    );

    let report = executor_with(registry)
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    let upload = report.node("upload").unwrap();
    assert_eq!(upload.status, NodeStatus::Failed);
    assert_eq!(upload.attempts, 2);
    assert_eq!(upload.error(), Some("attempt 2 failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn node_timeout_fails_node() {
    let flow = FlowDefinition::new(
        "slow",
        vec![
            NodeDefinition::new("wait", "delay")
                .with_config(json!({"seconds": 5}))
                .with_timeout(0.05),
        ],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    let wait = report.node("wait").unwrap();
    assert_eq!(wait.status, NodeStatus::Failed);
    assert_eq!(wait.error(), Some("Node 'wait' timed out after 0.05s"));
}

#[cfg(unix)]
#[tokio::test]
async fn timed_out_command_leaves_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("written-late");
    let script = format!("sleep 1; touch '{}'", marker.display());

    let flow = FlowDefinition::new(
        "late_writer",
        vec![
            NodeDefinition::new("cmd", "external_command")
                .with_config(json!({"cmd": "sh", "args": ["-c", script]}))
                .with_lock(LockTarget::TriggerFile)
                .with_timeout(0.3),
        ],
    );

    let executor = executor();
    let report = executor
        .run(&flow, FolderChange::file("photos", "F1"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Failed);
    assert_eq!(
        report.node("cmd").unwrap().error(),
        Some("Node 'cmd' timed out after 0.3s")
    );
    let photos = executor.folders().get("photos").unwrap();
    assert!(!photos.is_locked("F1").unwrap());

    // The tool was killed along with the node, not left running unlocked
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

// --- Concurrency ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_nodes_run_in_parallel() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(OverlapCounter {
        active: active.clone(),
        peak: peak.clone(),
    }));

    let flow = FlowDefinition::new(
        "fan_out",
        vec![
            NodeDefinition::new("a", "overlap"),
            NodeDefinition::new("b", "overlap"),
            NodeDefinition::new("c", "overlap"),
        ],
    );

    let report = executor_with(registry)
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Success);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn semaphore_bounds_parallelism() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(OverlapCounter {
        active: active.clone(),
        peak: peak.clone(),
    }));

    let flow = FlowDefinition::new(
        "bounded",
        (0..6)
            .map(|i| NodeDefinition::new(&format!("n{i}"), "overlap"))
            .collect(),
    );

    let executor = executor_with(registry).with_settings(ExecutorSettings {
        max_concurrent_nodes: 1,
        ..settings()
    });
    let report = executor
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Success);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_on_same_file_never_overlap() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(OverlapCounter {
        active: active.clone(),
        peak: peak.clone(),
    }));

    let flow = FlowDefinition::new(
        "same_file",
        vec![
            NodeDefinition::new("one", "overlap").with_lock(LockTarget::TriggerFile),
            NodeDefinition::new("two", "overlap").with_lock(LockTarget::TriggerFile),
            NodeDefinition::new("three", "overlap").with_lock(LockTarget::TriggerFile),
        ],
    );

    let executor = executor_with(registry).with_settings(ExecutorSettings {
        lock_timeout: Duration::from_secs(5),
        ..settings()
    });
    let report = executor
        .run(&flow, FolderChange::file("photos", "F1"))
        .await
        .unwrap();

    assert_eq!(report.outcome, FlowOutcome::Success);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(executor.folders().get("photos").unwrap().locked_files().is_empty());
}

// --- Lock contention ---

async fn contended_run(policy: LockContentionPolicy) -> FlowReport {
    let executor = executor().with_settings(ExecutorSettings {
        lock_contention: policy,
        lock_timeout: Duration::from_millis(50),
        ..settings()
    });
    let folder = executor.folders().get("photos").unwrap();
    let _held = folder.try_acquire("F1").unwrap().unwrap();

    let flow = FlowDefinition::new(
        "contended",
        vec![
            NodeDefinition::new("touch", "log")
                .with_lock(LockTarget::File("F1".to_string()))
                .with_retry(1, 0.01),
            NodeDefinition::new("after", "log").depends_on(&["touch"]),
        ],
    );

    executor
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap()
}

#[tokio::test]
async fn contention_fail_policy() {
    let report = contended_run(LockContentionPolicy::Fail).await;

    assert_eq!(report.outcome, FlowOutcome::Failed);
    let touch = report.node("touch").unwrap();
    assert_eq!(touch.status, NodeStatus::Failed);
    assert!(touch.error().unwrap().contains("F1"));
    assert_eq!(touch.attempts, 1);
}

#[tokio::test]
async fn contention_skip_policy_is_partial() {
    let report = contended_run(LockContentionPolicy::Skip).await;

    assert_eq!(report.outcome, FlowOutcome::Partial);
    assert!(report.error.is_none());
    assert_eq!(
        report.node("touch").unwrap().skip_reason,
        Some(SkipReason::LockContention {
            file_id: "F1".to_string()
        })
    );
    assert_eq!(report.node("after").unwrap().status, NodeStatus::Skipped);
}

#[tokio::test]
async fn contention_retry_policy_uses_retry_budget() {
    let report = contended_run(LockContentionPolicy::Retry).await;

    let touch = report.node("touch").unwrap();
    assert_eq!(touch.status, NodeStatus::Failed);
    assert_eq!(touch.attempts, 2);
}

#[tokio::test]
async fn trigger_file_lock_without_file_fails_node() {
    let flow = FlowDefinition::new(
        "needs_file",
        vec![NodeDefinition::new("hash", "log").with_lock(LockTarget::TriggerFile)],
    );

    let report = executor()
        .run(&flow, FolderChange::folder("photos"))
        .await
        .unwrap();

    assert_eq!(report.node("hash").unwrap().status, NodeStatus::Failed);
}

#[tokio::test]
async fn lock_in_unregistered_folder_fails_node() {
    let flow = FlowDefinition::new(
        "elsewhere",
        vec![NodeDefinition::new("hash", "log").with_lock(LockTarget::TriggerFile)],
    );

    let report = executor()
        .run(&flow, FolderChange::file("music", "song.flac"))
        .await
        .unwrap();

    let hash = report.node("hash").unwrap();
    assert_eq!(hash.status, NodeStatus::Failed);
    assert!(hash.error().unwrap().contains("music"));
}

// --- Concurrent runs over one folder ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_for_distinct_files_overlap_same_file_waits() {
    let flow = FlowDefinition::new(
        "sync_file",
        vec![
            NodeDefinition::new("copy", "delay")
                .with_config(json!({"seconds": 0.2}))
                .with_lock(LockTarget::TriggerFile),
        ],
    );
    let executor = executor().with_settings(ExecutorSettings {
        lock_timeout: Duration::from_secs(5),
        ..settings()
    });
    let plan = executor.validate(&flow).unwrap();

    let started = std::time::Instant::now();
    let (f1, f2) = tokio::join!(
        executor.execute(&plan, FolderChange::file("photos", "F1")),
        executor.execute(&plan, FolderChange::file("photos", "F2")),
    );
    let parallel = started.elapsed();
    assert_eq!(f1.outcome, FlowOutcome::Success);
    assert_eq!(f2.outcome, FlowOutcome::Success);
    assert!(parallel < Duration::from_millis(380), "F1 and F2 blocked each other: {parallel:?}");

    let started = std::time::Instant::now();
    let (first, again) = tokio::join!(
        executor.execute(&plan, FolderChange::file("photos", "F1")),
        executor.execute(&plan, FolderChange::file("photos", "F1")),
    );
    let serial = started.elapsed();
    assert_eq!(first.outcome, FlowOutcome::Success);
    assert_eq!(again.outcome, FlowOutcome::Success);
    assert!(serial >= Duration::from_millis(400), "second F1 run did not wait: {serial:?}");
}
