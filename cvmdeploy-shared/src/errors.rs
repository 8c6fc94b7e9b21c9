//! Error types for deployment operations.

use thiserror::Error;

/// Result alias used across cvmdeploy.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors raised while provisioning a confidential VM deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Required external tools are not on the execution path.
    #[error("missing required tools: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    /// A remote control plane call (subprocess) exited unsuccessfully.
    #[error("command `{command}` failed (exit status {}): {stderr}", status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into()))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The source image cannot be used (unreadable, not a file, zero bytes).
    #[error("image error: {0}")]
    Image(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Whether the control plane rejected the call because the resource
    /// already exists or is in use.
    pub fn is_conflict(&self) -> bool {
        match self {
            DeployError::CommandFailed { stderr, .. } => {
                stderr.contains("Conflict")
                    || stderr.contains("AlreadyExists")
                    || stderr.contains("already exists")
            }
            _ => false,
        }
    }

    /// Whether the target resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            DeployError::NotFound(_) => true,
            DeployError::CommandFailed { stderr, .. } => {
                stderr.contains("ResourceNotFound")
                    || stderr.contains("ResourceGroupNotFound")
                    || stderr.contains("was not found")
            }
            _ => false,
        }
    }
}
