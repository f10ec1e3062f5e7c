mod config;

pub use config::SyncFlowConfig;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::concurrency::FolderRegistry;
use crate::engine::types::{FlowDefinition, FlowReport, FolderChange, NodeStatus};
use crate::engine::{FlowExecutor, SyncOrchestrator, TriggerOutcome};
use crate::nodes::NodeRegistry;
use crate::storage::memory_store::MemoryReportStore;

#[derive(Parser)]
#[command(name = "syncflow", version, about = "File sync and backup flow engine")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to syncflow.yaml (default: auto-detect in cwd)
    #[arg(long, global = true, env = "SYNCFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a flow once for a folder (and optionally one file)
    Run {
        /// Path to the flow file (YAML or JSON)
        flow: PathBuf,

        /// Folder id the run is triggered for
        #[arg(long, default_value = "default")]
        folder: String,

        /// File id within the folder
        #[arg(long)]
        file: Option<String>,

        /// Directory of the folder; when set, the change is observed on disk
        /// first and the flow only runs if something changed
        #[arg(long)]
        folder_path: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file without executing
    Validate {
        /// Path to the flow file (YAML or JSON)
        flow: PathBuf,
    },

    /// Scan a folder, record file events, and run the flows bound to it
    Scan {
        /// Folder id
        folder: String,

        /// Directory of the folder (default: from config)
        path: Option<PathBuf>,

        /// Directory with flow files to run on changes
        #[arg(long, env = "SYNCFLOW_FLOWS_DIR")]
        flows_dir: Option<PathBuf>,
    },

    /// List available node implementations
    Nodes,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let config = SyncFlowConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            flow,
            folder,
            file,
            folder_path,
            json,
            verbose,
        } => {
            let trigger = FolderChange {
                folder_id: folder,
                file_id: file,
            };
            match folder_path {
                Some(root) => cmd_run_observed(&config, flow, trigger, root, json).await,
                None => cmd_run(&config, flow, trigger, json, verbose).await,
            }
        }
        Commands::Validate { flow } => cmd_validate(flow),
        Commands::Scan {
            folder,
            path,
            flows_dir,
        } => cmd_scan(&config, folder, path, flows_dir).await,
        Commands::Nodes => cmd_nodes(),
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

fn executor(config: &SyncFlowConfig) -> FlowExecutor {
    FlowExecutor::new(
        Arc::new(NodeRegistry::with_builtins()),
        Arc::new(FolderRegistry::new()),
    )
    .with_settings(config.executor_settings())
}

async fn cmd_run(
    config: &SyncFlowConfig,
    flow_path: PathBuf,
    trigger: FolderChange,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let flow = FlowDefinition::load(&flow_path)?;
    println!("Flow: {} ({} nodes)", flow.name, flow.nodes.len());

    let executor = executor(config);
    executor.folders().register(&trigger.folder_id)?;

    let plan = executor.validate(&flow)?;
    if verbose {
        println!("\nExecution order:");
        for node in plan.nodes() {
            let deps = if node.dependencies.is_empty() {
                String::from("none")
            } else {
                node.dependencies.join(", ")
            };
            println!("  {} [{}] deps: {}", node.name, node.implementation, deps);
        }
    }

    let report = executor.execute(&plan, trigger).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, verbose);
    }

    if let Some(err) = &report.error {
        anyhow::bail!("Flow '{}' failed: {}", report.flow_name, err);
    }
    Ok(())
}

/// Run a flow through the change detector: the trigger is observed under
/// `root`, and the flow runs once per recorded event.
async fn cmd_run_observed(
    config: &SyncFlowConfig,
    flow_path: PathBuf,
    trigger: FolderChange,
    root: PathBuf,
    json: bool,
) -> Result<()> {
    let flow = FlowDefinition::load(&flow_path)?;

    let orchestrator = SyncOrchestrator::new(executor(config), Arc::new(MemoryReportStore::new()));
    orchestrator.register_folder(&trigger.folder_id, &root)?;
    orchestrator.add_flow(&flow)?;

    let reports = match orchestrator.handle_change(trigger).await? {
        TriggerOutcome::Executed { reports, .. } => reports,
        TriggerOutcome::Deferred | TriggerOutcome::NoChange => {
            println!("No changes; flow '{}' not run", flow.name);
            return Ok(());
        }
    };

    for report in &reports {
        if json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            print_report(report, false);
        }
    }

    if let Some(failed) = reports.iter().find(|r| r.error.is_some()) {
        anyhow::bail!(
            "Flow '{}' failed: {}",
            failed.flow_name,
            failed.error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_validate(flow_path: PathBuf) -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let flow = FlowDefinition::load(&flow_path)?;

    println!("Flow: {}", flow.name);
    println!("Nodes: {}", flow.nodes.len());

    let plan = crate::engine::validate(&flow, &registry)
        .with_context(|| format!("Validation failed for {}", flow_path.display()))?;

    println!("Validation: OK");
    println!("\nExecution order:");
    for node in plan.nodes() {
        let deps = if node.dependencies.is_empty() {
            String::from("(no dependencies)")
        } else {
            format!("depends on: {}", node.dependencies.join(", "))
        };
        println!("  {} [{}] {}", node.name, node.implementation, deps);
    }

    Ok(())
}

async fn cmd_scan(
    config: &SyncFlowConfig,
    folder: String,
    path: Option<PathBuf>,
    flows_dir: Option<PathBuf>,
) -> Result<()> {
    let root = path
        .or_else(|| {
            config
                .folders
                .as_ref()
                .and_then(|f| f.get(&folder))
                .map(PathBuf::from)
        })
        .ok_or_else(|| anyhow::anyhow!("No path given for folder '{}'", folder))?;

    let orchestrator = SyncOrchestrator::new(executor(config), Arc::new(MemoryReportStore::new()));
    orchestrator.register_folder(&folder, &root)?;

    let flows_dir = flows_dir.or_else(|| config.flows_dir.as_ref().map(PathBuf::from));
    if let Some(dir) = flows_dir {
        for flow_path in flow_files(&dir)? {
            let flow = FlowDefinition::load(&flow_path)?;
            orchestrator
                .add_flow(&flow)
                .with_context(|| format!("Invalid flow: {}", flow_path.display()))?;
        }
    }

    match orchestrator.handle_change(FolderChange::folder(&folder)).await? {
        TriggerOutcome::Deferred => println!("Scan deferred: another scan is running"),
        TriggerOutcome::NoChange => println!("No changes in '{}'", folder),
        TriggerOutcome::Executed { events, reports } => {
            println!("Events: {}", events.len());
            for event in &events {
                println!(
                    "  #{} {} {} ({})",
                    event.file_event_id, event.kind, event.file_id, event.file_md5_checksum
                );
            }
            for report in &reports {
                println!();
                print_report(report, false);
            }
        }
    }

    Ok(())
}

fn flow_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read flows dir: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml" | "json")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

fn print_report(report: &FlowReport, verbose: bool) {
    println!("Run ID: {}", report.run_id);
    println!("Flow: {}", report.flow_name);
    println!("Outcome: {}", report.outcome);

    println!("\nNodes:");
    for node in &report.nodes {
        let status_icon = match node.status {
            NodeStatus::Success => "✓",
            NodeStatus::Failed => "✗",
            NodeStatus::Skipped => "⊘",
        };
        println!(
            "  {} {} [{}] (attempts {})",
            status_icon, node.name, node.implementation, node.attempts
        );
        if let Some(reason) = &node.skip_reason {
            println!("    Skipped: {}", reason);
        }
        if let Some(err) = node.error() {
            println!("    Error: {}", err);
        }
        if verbose {
            if let (Some(s), Some(f)) = (&node.started, &node.finished) {
                println!("    Duration: {}ms", (*f - *s).num_milliseconds());
            }
            if let Some(result) = &node.result {
                println!(
                    "    Returned: {}",
                    serde_json::to_string(result.return_val()).unwrap_or_default()
                );
            }
        }
    }
}

fn cmd_nodes() -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let nodes = registry.list();

    println!("{:<22} DESCRIPTION", "IMPLEMENTATION");
    println!("{}", "-".repeat(60));

    for (name, desc) in &nodes {
        println!("{:<22} {}", name, desc);
    }

    println!("\nTotal: {} node(s)", nodes.len());
    Ok(())
}
