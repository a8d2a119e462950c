//! Error types for the ONTAP NAS administration tooling
//!
//! Provides structured error types for the remote storage client, the
//! mirror-break-and-clone workflow, configuration and the provisioning
//! helpers.

use std::time::Duration;
use thiserror::Error;

use crate::workflow::WorkflowStage;

/// Unified error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Remote Storage Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Request failed: {operation}: {cause}")]
    RequestFailed {
        operation: String,
        /// HTTP status, absent when a cluster job reported the failure
        status: Option<u16>,
        cause: String,
    },

    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout { operation: String, waited: Duration },

    #[error("Management API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // =========================================================================
    // Workflow Errors
    // =========================================================================
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: WorkflowStage,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Wrap an error with the workflow stage it aborted
    pub fn at_stage(self, stage: WorkflowStage) -> Self {
        Error::StageFailed {
            stage,
            source: Box::new(self),
        }
    }

    /// The originating error, with any stage context peeled off
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Stage a workflow error was raised in, if any
    pub fn stage(&self) -> Option<WorkflowStage> {
        match self {
            Error::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self.root_cause() {
            Error::Transport(_) | Error::Timeout { .. } => true,
            Error::RequestFailed { status, .. } => status.map_or(false, |s| s >= 500),
            _ => false,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.root_cause() {
            Error::Configuration(_) | Error::Validation(_) => 2,
            Error::NotFound { .. } => 3,
            Error::PreconditionFailed(_) => 4,
            Error::Timeout { .. } => 5,
            _ => 1,
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_survives_stage_wrapping() {
        let err = Error::not_found("SnapmirrorRelationship", "svm1:vol1")
            .at_stage(WorkflowStage::ResolveRelationship);

        assert_eq!(err.stage(), Some(WorkflowStage::ResolveRelationship));
        assert!(matches!(err.root_cause(), Error::NotFound { .. }));
        assert_eq!(err.exit_code(), 3);

        let message = err.to_string();
        assert!(message.contains("resolve-relationship"));
        assert!(message.contains("svm1:vol1"));
    }

    #[test]
    fn test_error_transient() {
        let server_side = Error::RequestFailed {
            operation: "patch relationship".into(),
            status: Some(503),
            cause: "busy".into(),
        };
        assert!(server_side.is_transient());

        let rejected = Error::RequestFailed {
            operation: "patch relationship".into(),
            status: Some(400),
            cause: "invalid state".into(),
        };
        assert!(!rejected.is_transient());

        let timeout = Error::Timeout {
            operation: "sync".into(),
            waited: Duration::from_secs(10),
        }
        .at_stage(WorkflowStage::AwaitSync);
        assert!(timeout.is_transient());
        assert_eq!(timeout.exit_code(), 5);

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_transient());
        assert_eq!(config_err.exit_code(), 2);
    }
}
