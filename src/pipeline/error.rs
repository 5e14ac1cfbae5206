//! Processing error taxonomy.

use thiserror::Error;
use tracing::debug;

use crate::tools::{ToolError, ToolOutput};

/// Classified failure of a pipeline stage.
///
/// Raw tool stderr is never carried here; it is logged where it is seen.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessingError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{tool} is unavailable")]
    ToolUnavailable { tool: String },

    #[error("{tool} timed out")]
    ToolTimeout { tool: String },

    #[error("{tool} failed: {summary}")]
    ToolExecutionFailure { tool: String, summary: String },

    #[error("output check failed: {0}")]
    OutputIntegrity(String),

    #[error("every {chain} candidate failed, last error: {last_error}")]
    ExhaustedFallback { chain: String, last_error: String },
}

impl ProcessingError {
    pub fn failure(tool: &str, summary: impl Into<String>) -> Self {
        Self::ToolExecutionFailure {
            tool: tool.to_string(),
            summary: summary.into(),
        }
    }

    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ToolUnavailable { .. } => "unavailable",
            Self::ToolTimeout { .. } => "timeout",
            Self::ToolExecutionFailure { .. } => "execution",
            Self::OutputIntegrity(_) => "integrity",
            Self::ExhaustedFallback { .. } => "exhausted",
        }
    }

    /// Short text for user-facing messages.
    pub fn summary(&self) -> String {
        match self {
            Self::Validation(reason) => reason.clone(),
            Self::ToolUnavailable { tool } => format!("{} unavailable", tool),
            Self::ToolTimeout { tool } => format!("{} timed out", tool),
            Self::ToolExecutionFailure { tool, .. } => format!("{} failed", tool),
            Self::OutputIntegrity(_) => "no usable output".to_string(),
            Self::ExhaustedFallback { chain, .. } => format!("no {} engine succeeded", chain),
        }
    }
}

impl From<ToolError> for ProcessingError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Unavailable(tool) => Self::ToolUnavailable { tool },
            ToolError::TimedOut { tool, .. } => Self::ToolTimeout { tool },
            ToolError::InvalidArgument { tool, source } => {
                Self::failure(&tool, format!("rejected argument {}", source))
            }
            ToolError::Io { tool, source } => Self::failure(&tool, source.to_string()),
        }
    }
}

/// Turns a nonzero exit into a classified failure, logging stderr.
pub fn check_exit(tool: &str, output: &ToolOutput) -> Result<(), ProcessingError> {
    if output.success() {
        return Ok(());
    }
    debug!("{} stderr: {}", tool, output.stderr_tail());
    let summary = match output.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    Err(ProcessingError::failure(tool, summary))
}
