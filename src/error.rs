//! Error families for flow definitions, node execution, input validation and
//! the file-event chain.

use std::path::{Component, Path};

use thiserror::Error;

/// Problems found while validating a flow definition. Any of these keeps the
/// flow from running at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Flow '{flow}' has no nodes")]
    EmptyFlow { flow: String },

    #[error("Flow '{flow}' defines node '{node}' more than once")]
    DuplicateNode { flow: String, node: String },

    #[error("Node '{node}' in flow '{flow}' depends on '{dependency}', which does not exist")]
    UnknownDependency {
        flow: String,
        node: String,
        dependency: String,
    },

    #[error("Cyclic dependency in flow '{flow}' (cycle closes at node '{node}')")]
    CyclicDependency { flow: String, node: String },

    #[error("Node '{node}' in flow '{flow}' uses unknown implementation '{implementation}'")]
    NodeImplementNotFound {
        flow: String,
        node: String,
        implementation: String,
    },
}

/// Failures local to a single node run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Tool '{tool}' failed with exit code {exit_code}: {message}")]
    ToolFailure {
        tool: String,
        exit_code: i32,
        message: String,
    },

    #[error("Timed out after {waited_ms}ms waiting for lock on '{file_id}' in folder '{folder_id}'")]
    LockTimeout {
        folder_id: String,
        file_id: String,
        waited_ms: u64,
    },

    #[error("Node '{node}' timed out after {seconds}s")]
    Timeout { node: String, seconds: f64 },
}

/// Bad input handed to the concurrency layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Folder '{folder_id}' is not registered")]
    UnknownFolder { folder_id: String },

    #[error("Folder '{folder_id}' is already registered")]
    FolderAlreadyRegistered { folder_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventChainError {
    #[error("Event chain for '{file_id}' in folder '{folder_id}' is closed by deletion event {closed_by}")]
    ChainClosed {
        folder_id: String,
        file_id: String,
        closed_by: u64,
    },
}

/// Umbrella error for the trigger path, which crosses every family.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    EventChain(#[from] EventChainError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ValidationError {
    pub(crate) fn invalid(kind: &'static str, value: &str) -> Self {
        ValidationError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        }
    }
}

/// Reject empty or whitespace-only identifiers.
pub(crate) fn check_identifier(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::invalid(kind, value));
    }
    Ok(())
}

/// A file id must be a relative path that stays inside its folder root.
pub(crate) fn check_file_id(value: &str) -> Result<(), ValidationError> {
    check_identifier("file", value)?;
    let escapes = Path::new(value).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ValidationError::invalid("file", value));
    }
    Ok(())
}
