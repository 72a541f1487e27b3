use std::fmt;

use serde::Serialize;

/// Structured error type for the whole crate. Replaces stringly-typed errors
/// so callers can match on the error kind and apply the right propagation
/// policy: `Configuration` and `Planning` abort a run, everything else is
/// isolated to the step that raised it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", content = "detail")]
pub enum AppError {
    Configuration { message: String },
    ContextGathering { source: String, message: String },
    Planning { message: String },
    UnknownOperation { name: String },
    NoActiveSession,
    NoActiveTable,
    UnknownColumn { columns: Vec<String> },
    InvalidArgument { message: String },
    Transform { message: String },
    ArtifactWrite { message: String },
}

impl AppError {
    /// Whether this error aborts the whole run (as opposed to one step).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Configuration { .. } | AppError::Planning { .. }
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Configuration { message } => write!(f, "Configuration error: {message}"),
            AppError::ContextGathering { source, message } => {
                write!(f, "Cannot read '{source}': {message}")
            }
            AppError::Planning { message } => write!(f, "Planning failed: {message}"),
            AppError::UnknownOperation { name } => write!(f, "Unknown operation: '{name}'"),
            AppError::NoActiveSession | AppError::NoActiveTable => {
                write!(f, "No active table. Load a sheet with load_table first")
            }
            AppError::UnknownColumn { columns } => {
                write!(f, "Column(s) not found: {}", columns.join(", "))
            }
            AppError::InvalidArgument { message } => write!(f, "{message}"),
            AppError::Transform { message } => write!(f, "{message}"),
            AppError::ArtifactWrite { message } => write!(f, "Failed to write artifact: {message}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::ArtifactWrite {
            message: e.to_string(),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::Transform {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Transform {
            message: e.to_string(),
        }
    }
}
