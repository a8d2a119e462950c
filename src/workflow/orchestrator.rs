//! Clone Refresh Orchestrator
//!
//! Runs the mirror-break-and-clone sequence against one destination volume:
//! 1. Resolve the replication relationship by destination path
//! 2. Purge stale clones of the destination volume
//! 3. Resume the mirror if it is broken off
//! 4. Wait for the transfer to settle
//! 5. Break the mirror
//! 6. Create the new clone
//!
//! Every stage runs to completion before the next one starts. The first
//! fatal error aborts the run and is returned wrapped with its stage.

use crate::domain::ports::{
    replication_path, RelationshipState, ReplicationPortRef, ReplicationRelationship, Volume,
    VolumePortRef,
};
use crate::error::{Error, Result};
use crate::workflow::clones::CloneLifecycleManager;
use crate::workflow::replication::{ReplicationStateMachine, ResyncPolicy, SyncWaitPolicy};
use crate::workflow::{WorkflowStage, WorkflowWarning};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Inputs of a clone refresh
#[derive(Debug, Clone)]
pub struct CloneRefreshConfig {
    /// SVM owning the destination volume
    pub svm_name: String,
    /// Destination volume of the mirror; parent of the clone
    pub volume_name: String,
    pub clone_name: String,
    pub junction_path: Option<String>,
    pub resync: ResyncPolicy,
    pub sync: SyncWaitPolicy,
}

impl CloneRefreshConfig {
    pub fn new(
        svm_name: impl Into<String>,
        volume_name: impl Into<String>,
        clone_name: impl Into<String>,
    ) -> Self {
        Self {
            svm_name: svm_name.into(),
            volume_name: volume_name.into(),
            clone_name: clone_name.into(),
            junction_path: None,
            resync: ResyncPolicy::default(),
            sync: SyncWaitPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("svm", &self.svm_name),
            ("volume", &self.volume_name),
            ("clone name", &self.clone_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{} must not be empty", field)));
            }
        }
        if self.clone_name == self.volume_name {
            return Err(Error::Configuration(format!(
                "clone name must differ from the parent volume '{}'",
                self.volume_name
            )));
        }
        if let Some(path) = &self.junction_path {
            if !path.starts_with('/') {
                return Err(Error::Configuration(format!(
                    "junction path '{}' must start with '/'",
                    path
                )));
            }
        }
        if self.sync.max_attempts == 0 {
            return Err(Error::Configuration(
                "sync max attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Report
// =============================================================================

/// What a successful run did
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub destination_path: String,
    /// Relationship as first observed
    pub relationship: ReplicationRelationship,
    pub resumed: bool,
    pub broke: bool,
    pub purged_clones: Vec<String>,
    pub warnings: Vec<WorkflowWarning>,
    /// Relationship reads issued while waiting for the transfer
    pub sync_polls: u32,
    pub final_state: RelationshipState,
    pub clone: Volume,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// =============================================================================
// Workflow
// =============================================================================

/// Mirror-break-and-clone workflow
pub struct CloneRefreshWorkflow {
    config: CloneRefreshConfig,
    replication: ReplicationPortRef,
    state_machine: ReplicationStateMachine,
    clones: CloneLifecycleManager,
}

impl CloneRefreshWorkflow {
    pub fn new(
        config: CloneRefreshConfig,
        replication: ReplicationPortRef,
        volumes: VolumePortRef,
    ) -> Self {
        let state_machine = ReplicationStateMachine::new(replication.clone(), config.sync.clone());
        Self {
            config,
            replication,
            state_machine,
            clones: CloneLifecycleManager::new(volumes),
        }
    }

    /// Execute all six stages
    pub async fn run(&self) -> Result<WorkflowReport> {
        let result = self.execute().await;
        if let Err(e) = &result {
            error!("Clone refresh aborted: {}", e);
        }
        result
    }

    async fn execute(&self) -> Result<WorkflowReport> {
        self.config.validate()?;

        let started_at = Utc::now();
        let destination_path = replication_path(&self.config.svm_name, &self.config.volume_name);
        info!(
            "Refreshing clone {} of {}",
            self.config.clone_name, destination_path
        );

        // Stage 1
        let relationship = self
            .resolve(&destination_path)
            .await
            .map_err(|e| e.at_stage(WorkflowStage::ResolveRelationship))?;
        info!(
            "Found relationship {} ({} -> {}) in state {}",
            relationship.id,
            relationship.source_path,
            relationship.destination_path,
            relationship.state
        );

        // Stage 2
        let purge = self
            .clones
            .purge_clones(
                &relationship.destination_svm.name,
                relationship.destination_volume(),
            )
            .await
            .map_err(|e| e.at_stage(WorkflowStage::PurgeClones))?;
        let mut warnings = purge.warnings;

        // Stage 3
        let resume = self
            .state_machine
            .resume(&relationship, self.config.resync)
            .await
            .map_err(|e| e.at_stage(WorkflowStage::ResumeMirror))?;
        let resumed = resume.was_issued();

        // Stage 4
        let sync = self
            .state_machine
            .await_sync(resume.relationship(), resumed)
            .await
            .map_err(|e| e.at_stage(WorkflowStage::AwaitSync))?;
        if sync.transfer_failed() {
            let warning = WorkflowWarning::TransferFailed {
                relationship: sync.relationship.id.clone(),
                state: sync
                    .relationship
                    .transfer_state()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            };
            warn!("{}", warning);
            warnings.push(warning);
        }

        // Stage 5
        let broken = self
            .state_machine
            .break_off(&sync.relationship)
            .await
            .map_err(|e| e.at_stage(WorkflowStage::BreakMirror))?;
        let broke = broken.was_issued();
        let final_state = broken.into_relationship().state;

        // Stage 6
        let clone = self
            .clones
            .create_clone(
                &relationship.destination_svm,
                relationship.destination_volume(),
                &self.config.clone_name,
                self.config.junction_path.as_deref(),
            )
            .await
            .map_err(|e| e.at_stage(WorkflowStage::CreateClone))?;

        info!(
            "Clone {} created from {} ({} stale clone(s) removed, {} warning(s))",
            clone.name,
            destination_path,
            purge.deleted.len(),
            warnings.len()
        );

        Ok(WorkflowReport {
            destination_path,
            relationship,
            resumed,
            broke,
            purged_clones: purge.deleted,
            warnings,
            sync_polls: sync.polls,
            final_state,
            clone,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn resolve(&self, destination_path: &str) -> Result<ReplicationRelationship> {
        let relationship = self
            .replication
            .find_relationship(destination_path)
            .await?
            .ok_or_else(|| Error::not_found("SnapmirrorRelationship", destination_path))?;

        ReplicationStateMachine::ensure_supported(&relationship)?;
        Ok(relationship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::TransferState;
    use crate::ontap::{SimulatedCluster, SimulatedClusterBuilder};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn config(resync: ResyncPolicy) -> CloneRefreshConfig {
        CloneRefreshConfig {
            resync,
            sync: SyncWaitPolicy {
                interval: Duration::from_millis(1),
                max_attempts: 50,
                deadline: None,
            },
            junction_path: Some("/vol_clone".into()),
            ..CloneRefreshConfig::new("fsx0svm1", "vol_secondary", "vol_clone")
        }
    }

    fn cluster(state: RelationshipState) -> SimulatedClusterBuilder {
        SimulatedCluster::builder()
            .volume("fsx0svm1", "vol_secondary")
            .relationship(
                "rel-1",
                "fsx0svm0:vol_primary",
                "fsx0svm1",
                "vol_secondary",
                state,
            )
    }

    fn workflow(cluster: &Arc<SimulatedCluster>, config: CloneRefreshConfig) -> CloneRefreshWorkflow {
        CloneRefreshWorkflow::new(config, cluster.clone(), cluster.clone())
    }

    async fn operations(cluster: &SimulatedCluster) -> Vec<&'static str> {
        cluster.calls().await.iter().map(|c| c.operation).collect()
    }

    #[tokio::test]
    async fn test_broken_off_without_resync_clones_directly() {
        let cluster = Arc::new(
            cluster(RelationshipState::BrokenOff)
                .clone_of("fsx0svm1", "vol_secondary", "vol_clone")
                .build(),
        );

        let report = workflow(&cluster, config(ResyncPolicy::Never))
            .run()
            .await
            .unwrap();

        assert!(!report.resumed);
        assert!(!report.broke);
        assert_eq!(report.purged_clones, vec!["vol_clone".to_string()]);
        assert!(report.warnings.is_empty());
        assert_eq!(report.sync_polls, 0);
        assert_eq!(report.clone.name, "vol_clone");
        assert_eq!(report.clone.parent_volume_name(), Some("vol_secondary"));
        assert_eq!(
            operations(&cluster).await,
            vec![
                "find_relationship",
                "list_volumes",
                "delete_volume",
                "find_volume",
                "create_clone"
            ]
        );
    }

    #[tokio::test]
    async fn test_broken_off_without_resync_and_no_stale_clone() {
        let cluster = Arc::new(cluster(RelationshipState::BrokenOff).build());

        let report = workflow(&cluster, config(ResyncPolicy::Never))
            .run()
            .await
            .unwrap();

        assert!(report.purged_clones.is_empty());
        assert_eq!(
            operations(&cluster).await,
            vec!["find_relationship", "list_volumes", "find_volume", "create_clone"]
        );
    }

    #[tokio::test]
    async fn test_transferring_mirror_is_waited_on_then_broken() {
        let cluster = Arc::new(
            cluster(RelationshipState::Snapmirrored)
                .transferring_for("rel-1", 3)
                .build(),
        );

        let report = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap();

        assert!(!report.resumed);
        assert!(report.broke);
        assert_eq!(report.sync_polls, 4);
        assert_eq!(report.final_state, RelationshipState::BrokenOff);
        assert_eq!(cluster.call_count("delete_volume").await, 0);

        // break only after the last transferring read
        let ops = operations(&cluster).await;
        let last_poll = ops.iter().rposition(|op| *op == "get_relationship").unwrap();
        let update = ops
            .iter()
            .position(|op| *op == "update_relationship_state")
            .unwrap();
        assert!(update > last_poll);
        assert_eq!(
            cluster.relationship_state("rel-1").await,
            Some(RelationshipState::BrokenOff)
        );
    }

    #[tokio::test]
    async fn test_missing_relationship_stops_everything() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("fsx0svm1", "vol_secondary").build());

        let err = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(WorkflowStage::ResolveRelationship));
        assert_matches!(err.root_cause(), Error::NotFound { .. });
        assert!(err.to_string().contains("resolve-relationship"));
        assert_eq!(operations(&cluster).await, vec!["find_relationship"]);
    }

    #[tokio::test]
    async fn test_failed_clone_deletion_is_a_warning() {
        let cluster = Arc::new(
            cluster(RelationshipState::Snapmirrored)
                .clone_of("fsx0svm1", "vol_secondary", "clone_a")
                .clone_of("fsx0svm1", "vol_secondary", "clone_b")
                .failing_delete("clone_a")
                .build(),
        );

        let report = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap();

        assert_eq!(report.purged_clones, vec!["clone_b".to_string()]);
        assert_matches!(
            report.warnings.as_slice(),
            [WorkflowWarning::CloneDeleteFailed { clone, .. }] if clone == "clone_a"
        );
        assert!(report.broke);
        assert_eq!(report.clone.name, "vol_clone");
    }

    #[tokio::test]
    async fn test_default_policy_resumes_then_breaks() {
        let cluster = Arc::new(
            cluster(RelationshipState::BrokenOff)
                .resync_transfer_polls(2)
                .build(),
        );

        let report = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap();

        assert!(report.resumed);
        assert!(report.broke);
        assert_eq!(report.relationship.state, RelationshipState::BrokenOff);
        assert_eq!(report.sync_polls, 3);
        assert_eq!(
            cluster.calls().await
                .iter()
                .filter(|c| c.operation == "update_relationship_state")
                .map(|c| c.target.clone())
                .collect::<Vec<_>>(),
            vec!["rel-1 -> snapmirrored", "rel-1 -> broken_off"]
        );
    }

    #[tokio::test]
    async fn test_rerun_replaces_previous_clone() {
        let cluster = Arc::new(cluster(RelationshipState::Snapmirrored).build());

        let first = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap();
        assert!(first.purged_clones.is_empty());

        let second = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap();
        assert_eq!(second.purged_clones, vec!["vol_clone".to_string()]);
        // the first run left the mirror broken off, so it is resynced again
        assert!(second.resumed);
        assert!(second.broke);

        let mut volumes = cluster.volume_names("fsx0svm1").await;
        volumes.sort();
        assert_eq!(volumes, vec!["vol_clone", "vol_secondary"]);
    }

    #[tokio::test]
    async fn test_unsupported_state_fails_before_any_change() {
        let cluster = Arc::new(
            cluster(RelationshipState::Unknown("in_sync".into()))
                .clone_of("fsx0svm1", "vol_secondary", "old_clone")
                .build(),
        );

        let err = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap_err();

        assert_matches!(err.root_cause(), Error::PreconditionFailed(_));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(cluster.call_count("delete_volume").await, 0);
    }

    #[tokio::test]
    async fn test_sync_timeout_names_stage() {
        let cluster = Arc::new(
            cluster(RelationshipState::Snapmirrored)
                .transferring_for("rel-1", u32::MAX)
                .build(),
        );
        let mut cfg = config(ResyncPolicy::Always);
        cfg.sync.max_attempts = 3;

        let err = workflow(&cluster, cfg).run().await.unwrap_err();

        assert_eq!(err.stage(), Some(WorkflowStage::AwaitSync));
        assert_matches!(err.root_cause(), Error::Timeout { .. });
        assert_eq!(cluster.call_count("update_relationship_state").await, 0);
        assert_eq!(cluster.call_count("create_clone").await, 0);
    }

    #[tokio::test]
    async fn test_failed_transfer_becomes_warning() {
        let cluster = Arc::new(
            cluster(RelationshipState::Snapmirrored)
                .transferring_for("rel-1", 1)
                .transfer_outcome(TransferState::Failed)
                .build(),
        );

        let report = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap();

        assert_matches!(
            report.warnings.as_slice(),
            [WorkflowWarning::TransferFailed { state, .. }] if state == "failed"
        );
        assert!(report.broke);
    }

    #[tokio::test]
    async fn test_break_failure_keeps_clones_untouched() {
        let cluster = Arc::new(
            cluster(RelationshipState::Snapmirrored)
                .failing_operation("update_relationship_state")
                .build(),
        );

        let err = workflow(&cluster, config(ResyncPolicy::Always))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(WorkflowStage::BreakMirror));
        assert_matches!(err.root_cause(), Error::RequestFailed { .. });
        assert_eq!(cluster.call_count("create_clone").await, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut cfg = CloneRefreshConfig::new("svm", "vol", "vol");
        assert_matches!(cfg.validate(), Err(Error::Configuration(_)));

        cfg.clone_name = "vol_clone".into();
        assert!(cfg.validate().is_ok());

        cfg.junction_path = Some("vol_clone".into());
        assert_matches!(cfg.validate(), Err(Error::Configuration(_)));
    }
}
