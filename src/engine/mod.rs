pub mod executor;
pub mod orchestrator;
pub mod types;
pub mod validator;

pub use executor::{ExecutorSettings, FlowExecutor};
pub use orchestrator::{SyncOrchestrator, TriggerOutcome};
pub use validator::{ExecutionPlan, validate};
