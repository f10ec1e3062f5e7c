use serde::{Deserialize, Serialize};

use crate::engine::types::{NodeResult, ReturnValues};
use crate::error::ExecutionError;

/// Exit code recorded when an invocation never produced one: the process
/// could not be started, or the call failed before the tool finished.
pub const NO_EXIT_CODE: i32 = -1;

/// Outcome of one external-tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    /// Structured fields the tool reported (bytes transferred, snapshot id, ...).
    #[serde(default)]
    pub reported: ReturnValues,
}

impl CommandResult {
    pub fn succeeded(output: impl Into<String>, reported: ReturnValues) -> Self {
        Self {
            success: true,
            exit_code: 0,
            output: output.into(),
            error: String::new(),
            reported,
        }
    }

    pub fn failed(exit_code: i32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            output: String::new(),
            error: error.into(),
            reported: ReturnValues::new(),
        }
    }

    /// The invocation itself raised; there is no exit code to report.
    pub fn from_invocation_error(err: &anyhow::Error) -> Self {
        Self::failed(NO_EXIT_CODE, format!("{:#}", err))
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn has_exit_code(&self) -> bool {
        self.exit_code != NO_EXIT_CODE
    }

    /// Translate into the node result model.
    ///
    /// Success keeps every reported field plus `exit_code` and `output`.
    /// Failure carries the error text (falling back to captured output) and
    /// keeps `exit_code` for diagnostics.
    pub fn into_node_result(self) -> NodeResult {
        if self.success {
            return self.into_success();
        }
        let message = self.failure_detail();
        NodeResult::failed_with(message, self.failure_values())
    }

    /// Like [`into_node_result`](Self::into_node_result), but a failure the
    /// tool reported with an exit code is rendered as a
    /// [`ExecutionError::ToolFailure`] naming `tool`.
    pub fn into_tool_result(self, tool: &str) -> NodeResult {
        if self.success || !self.has_exit_code() {
            return self.into_node_result();
        }
        let failure = ExecutionError::ToolFailure {
            tool: tool.to_string(),
            exit_code: self.exit_code,
            message: self.failure_detail(),
        };
        NodeResult::failed_with(failure.to_string(), self.failure_values())
    }

    fn into_success(self) -> NodeResult {
        let mut values = self.reported;
        values.insert("exit_code".to_string(), self.exit_code.into());
        values.insert("output".to_string(), self.output.into());
        NodeResult::success(values)
    }

    fn failure_detail(&self) -> String {
        if !self.error.trim().is_empty() {
            self.error.clone()
        } else if !self.output.trim().is_empty() {
            self.output.clone()
        } else if self.exit_code == NO_EXIT_CODE {
            "invocation failed before producing an exit code".to_string()
        } else {
            format!("exited with code {}", self.exit_code)
        }
    }

    fn failure_values(self) -> ReturnValues {
        let mut values = self.reported;
        values.insert("exit_code".to_string(), self.exit_code.into());
        values
    }
}

impl From<CommandResult> for NodeResult {
    fn from(result: CommandResult) -> Self {
        result.into_node_result()
    }
}

/// Fold an invocation `Result` into a `CommandResult`, using the sentinel
/// exit code for errors raised before the tool reported anything.
pub fn settle(outcome: anyhow::Result<CommandResult>) -> CommandResult {
    outcome.unwrap_or_else(|e| CommandResult::from_invocation_error(&e))
}
