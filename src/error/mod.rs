use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

use crate::planner::PlanningError;

/// The unified error type for the adminflow crate
///
/// Step failures never surface through this type: they are recorded on the
/// run's `StepRun` records. `AdminflowError` covers the failures that stop an
/// orchestrator call from producing a run at all (planning, configuration,
/// storage) or that reject an illegal lifecycle request.
#[derive(Error, Debug)]
pub enum AdminflowError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Planning error: {message}")]
    Planning {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Workflow error: {message}")]
    Workflow {
        code: u16,
        message: String,
        workflow_id: Option<String>,
        step: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

}

impl AdminflowError {
    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a planning error with specific code
    pub fn planning_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Planning {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with default code
    pub fn storage(message: impl Into<String>) -> Self {
        Self::storage_with_code(ErrorCode::STORAGE_GENERIC, message, None)
    }

    /// Create a storage error with specific code and path
    pub fn storage_with_code(
        code: u16,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create a workflow error with specific code and workflow id
    pub fn workflow_with_code(
        code: u16,
        message: impl Into<String>,
        workflow_id: Option<String>,
    ) -> Self {
        Self::Workflow {
            code,
            message: message.into(),
            workflow_id,
            step: None,
            source: None,
        }
    }

    /// Workflow run lookup miss
    pub fn run_not_found(workflow_id: &str) -> Self {
        Self::workflow_with_code(
            ErrorCode::WORKFLOW_NOT_FOUND,
            format!("no workflow run with id {workflow_id}"),
            Some(workflow_id.to_string()),
        )
    }

    /// Attach a source error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Planning { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Workflow { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Planning { message, .. }
            | Self::Storage { message, .. }
            | Self::Workflow { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Set the step for a workflow error
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        if let Self::Workflow {
            step: ref mut s, ..
        } = self
        {
            *s = Some(step.into());
        }
        self
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Planning { .. } => 3,
            Self::Storage { .. } => 4,
            Self::Workflow { .. } => 6,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Planning { code, .. }
            | Self::Storage { code, .. }
            | Self::Workflow { code, .. } => *code,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Planning { message, .. } => format!("Could not plan workflow: {}", message),
            Self::Storage { message, path, .. } => {
                if let Some(p) = path {
                    format!("Storage error at {}: {}", p.display(), message)
                } else {
                    format!("Storage error: {}", message)
                }
            }
            Self::Workflow {
                message,
                workflow_id,
                step,
                ..
            } => {
                let mut msg = String::from("Workflow error");
                if let Some(id) = workflow_id {
                    msg.push_str(&format!(" in '{}'", id));
                }
                if let Some(s) = step {
                    msg.push_str(&format!(" at step '{}'", s));
                }
                format!("{}: {}", msg, message)
            }
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        let mut out = format!("{}", self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
        out
    }
}

/// Type alias for Results using AdminflowError
pub type Result<T> = std::result::Result<T, AdminflowError>;

impl From<std::io::Error> for AdminflowError {
    fn from(err: std::io::Error) -> Self {
        AdminflowError::storage_with_code(
            ErrorCode::STORAGE_IO_ERROR,
            "I/O operation failed",
            None,
        )
        .with_source(err)
    }
}

impl From<serde_json::Error> for AdminflowError {
    fn from(err: serde_json::Error) -> Self {
        AdminflowError::storage_with_code(
            ErrorCode::STORAGE_DESERIALIZATION_ERROR,
            "Invalid JSON workflow state",
            None,
        )
        .with_source(err)
    }
}

impl From<toml::de::Error> for AdminflowError {
    fn from(err: toml::de::Error) -> Self {
        AdminflowError::config_with_code(ErrorCode::CONFIG_INVALID_TOML, "Invalid TOML syntax")
            .with_source(err)
    }
}

impl From<PlanningError> for AdminflowError {
    fn from(err: PlanningError) -> Self {
        let code = match err {
            PlanningError::UnsupportedIntent { .. } => ErrorCode::PLANNING_UNSUPPORTED_INTENT,
            PlanningError::EmptyPlan => ErrorCode::PLANNING_EMPTY_PLAN,
        };
        AdminflowError::planning_with_code(code, err.to_string()).with_source(err)
    }
}
