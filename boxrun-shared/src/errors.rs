//! Error taxonomy shared by the run driver and its front-ends.

use thiserror::Error;

/// Result alias used across the workspace.
pub type BoxrunResult<T> = Result<T, BoxrunError>;

/// Errors produced while driving a container run.
#[derive(Debug, Error)]
pub enum BoxrunError {
    /// Mutually exclusive options were requested. Detected before any daemon call.
    #[error("{0}")]
    ConfigConflict(String),

    /// A daemon call failed. Carries the daemon's text, envelope prefix included.
    #[error("{0}")]
    DaemonCommunication(String),

    /// Hijack setup or stream copy failed.
    #[error("attach failed: {0}")]
    AttachFailure(String),

    /// Used to unblock background tasks. Never surfaced to the caller.
    #[error("operation cancelled")]
    InternalCancel,

    /// A classified outcome with an explicit process exit code.
    #[error("Status: {message}, Code: {code}")]
    Status { code: i32, message: String },

    /// CID file could not be created, written or removed.
    #[error("{0}")]
    CidFile(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BoxrunError {
    /// Process exit status for this failure.
    ///
    /// Classified outcomes carry their own code; everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            BoxrunError::Status { code, .. } => *code,
            _ => 1,
        }
    }

    /// Whether this error only exists to unblock a background task.
    pub fn is_cancel(&self) -> bool {
        matches!(self, BoxrunError::InternalCancel)
    }
}

impl From<serde_json::Error> for BoxrunError {
    fn from(err: serde_json::Error) -> Self {
        BoxrunError::Internal(format!("json: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_keeps_its_code() {
        let err = BoxrunError::Status {
            code: 127,
            message: "Container command 'nope' not found".into(),
        };
        assert_eq!(err.exit_code(), 127);
        assert!(err.to_string().contains("Code: 127"));
    }

    #[test]
    fn unclassified_errors_exit_with_one() {
        assert_eq!(BoxrunError::ConfigConflict("x".into()).exit_code(), 1);
        assert_eq!(BoxrunError::AttachFailure("x".into()).exit_code(), 1);
        assert_eq!(BoxrunError::DaemonCommunication("x".into()).exit_code(), 1);
    }

    #[test]
    fn daemon_text_is_passed_through() {
        let err = BoxrunError::DaemonCommunication("Error response from daemon: boom".into());
        assert_eq!(err.to_string(), "Error response from daemon: boom");
    }
}
