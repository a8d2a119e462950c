//! Mirror-break-and-clone workflow
//!
//! - `replication`: resume / bounded sync wait / break of a relationship
//! - `clones`: purge and creation of FlexClones
//! - `orchestrator`: the linear six-stage run

pub mod clones;
pub mod orchestrator;
pub mod replication;

pub use clones::{CloneLifecycleManager, PurgeReport};
pub use orchestrator::{CloneRefreshConfig, CloneRefreshWorkflow, WorkflowReport};
pub use replication::{ReplicationStateMachine, ResyncPolicy, SyncOutcome, SyncWaitPolicy};

use serde::{Deserialize, Serialize};

// =============================================================================
// Stages
// =============================================================================

/// Stages of a clone refresh, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStage {
    ResolveRelationship,
    PurgeClones,
    ResumeMirror,
    AwaitSync,
    BreakMirror,
    CreateClone,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::ResolveRelationship => "resolve-relationship",
            WorkflowStage::PurgeClones => "purge-clones",
            WorkflowStage::ResumeMirror => "resume-mirror",
            WorkflowStage::AwaitSync => "await-sync",
            WorkflowStage::BreakMirror => "break-mirror",
            WorkflowStage::CreateClone => "create-clone",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Warnings
// =============================================================================

/// Non-fatal problems collected during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowWarning {
    /// A stale clone could not be deleted; it is left in place
    CloneDeleteFailed { clone: String, cause: String },
    /// The catch-up transfer ended in a state other than success
    TransferFailed {
        relationship: String,
        state: String,
    },
}

impl std::fmt::Display for WorkflowWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowWarning::CloneDeleteFailed { clone, cause } => {
                write!(f, "could not delete clone {}: {}", clone, cause)
            }
            WorkflowWarning::TransferFailed {
                relationship,
                state,
            } => write!(
                f,
                "last transfer of relationship {} ended as {}",
                relationship, state
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(WorkflowStage::ResolveRelationship.to_string(), "resolve-relationship");
        assert_eq!(WorkflowStage::AwaitSync.to_string(), "await-sync");
        assert_eq!(
            serde_json::to_string(&WorkflowStage::CreateClone).unwrap(),
            "\"create-clone\""
        );
    }

    #[test]
    fn test_warning_display() {
        let warning = WorkflowWarning::CloneDeleteFailed {
            clone: "vol_clone".into(),
            cause: "volume is busy".into(),
        };
        assert_eq!(
            warning.to_string(),
            "could not delete clone vol_clone: volume is busy"
        );
    }
}
