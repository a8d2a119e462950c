//! Clone Lifecycle Manager
//!
//! Removes stale FlexClones of a volume and creates the fresh one.

use crate::domain::ports::{CloneRequest, ResourceRef, Volume, VolumeFilter, VolumePortRef};
use crate::error::{Error, Result};
use crate::workflow::WorkflowWarning;
use tracing::{info, warn};

/// Outcome of a purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Names of the clones that were deleted
    pub deleted: Vec<String>,
    /// One entry per clone that could not be deleted
    pub warnings: Vec<WorkflowWarning>,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Purges and creates FlexClones through a [`VolumePortRef`]
pub struct CloneLifecycleManager {
    volumes: VolumePortRef,
}

impl CloneLifecycleManager {
    pub fn new(volumes: VolumePortRef) -> Self {
        Self { volumes }
    }

    /// Force-delete every FlexClone of `parent_volume` in `svm_name`
    ///
    /// A failure to list the clones is returned as an error. A failure to
    /// delete one clone is recorded in the report and the purge continues
    /// with the next one.
    pub async fn purge_clones(&self, svm_name: &str, parent_volume: &str) -> Result<PurgeReport> {
        let filter = VolumeFilter::clones_of(parent_volume).with_svm(svm_name);
        let clones = self.volumes.list_volumes(&filter).await?;

        let mut report = PurgeReport::default();
        if clones.is_empty() {
            info!("No clones of {} to clean up", parent_volume);
            return Ok(report);
        }

        for clone in clones {
            info!("Deleting clone {} of {}", clone.name, parent_volume);
            match self.volumes.delete_volume(&clone.id, true).await {
                Ok(()) => report.deleted.push(clone.name),
                Err(e) => {
                    warn!("Could not delete clone {}: {}", clone.name, e);
                    report.warnings.push(WorkflowWarning::CloneDeleteFailed {
                        clone: clone.name,
                        cause: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Create `clone_name` as a FlexClone of `parent_volume`
    pub async fn create_clone(
        &self,
        svm: &ResourceRef,
        parent_volume: &str,
        clone_name: &str,
        junction_path: Option<&str>,
    ) -> Result<Volume> {
        let parent = self
            .volumes
            .find_volume(&svm.name, parent_volume)
            .await?
            .ok_or_else(|| Error::not_found("Volume", format!("{}:{}", svm.name, parent_volume)))?;

        info!(
            "Creating clone {} of {} in {}",
            clone_name, parent.name, svm.name
        );
        let request = CloneRequest {
            parent_svm: svm.clone(),
            parent_volume: ResourceRef::new(&parent.id, &parent.name),
            clone_name: clone_name.to_string(),
            junction_path: junction_path.map(str::to_string),
        };

        self.volumes.create_clone(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontap::SimulatedCluster;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_purge_removes_only_clones_of_parent() {
        let cluster = Arc::new(
            SimulatedCluster::builder()
                .volume("svm1", "vol1")
                .volume("svm1", "vol2")
                .clone_of("svm1", "vol1", "vol1_clone_a")
                .clone_of("svm1", "vol1", "vol1_clone_b")
                .clone_of("svm1", "vol2", "vol2_clone")
                .build(),
        );
        let manager = CloneLifecycleManager::new(cluster.clone());

        let report = manager.purge_clones("svm1", "vol1").await.unwrap();

        assert_eq!(report.deleted.len(), 2);
        assert!(report.is_clean());
        let mut remaining = cluster.volume_names("svm1").await;
        remaining.sort();
        assert_eq!(remaining, vec!["vol1", "vol2", "vol2_clone"]);
    }

    #[tokio::test]
    async fn test_purge_with_nothing_to_clean() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("svm1", "vol1").build());
        let manager = CloneLifecycleManager::new(cluster.clone());

        let report = manager.purge_clones("svm1", "vol1").await.unwrap();
        assert_eq!(report, PurgeReport::default());
        assert_eq!(cluster.call_count("delete_volume").await, 0);
    }

    #[tokio::test]
    async fn test_purge_continues_after_failed_delete() {
        let cluster = Arc::new(
            SimulatedCluster::builder()
                .volume("svm1", "vol1")
                .clone_of("svm1", "vol1", "a_busy")
                .clone_of("svm1", "vol1", "b_idle")
                .failing_delete("a_busy")
                .build(),
        );
        let manager = CloneLifecycleManager::new(cluster.clone());

        let report = manager.purge_clones("svm1", "vol1").await.unwrap();

        assert_eq!(report.deleted, vec!["b_idle".to_string()]);
        assert_matches!(
            report.warnings.as_slice(),
            [WorkflowWarning::CloneDeleteFailed { clone, .. }] if clone == "a_busy"
        );
        assert_eq!(cluster.call_count("delete_volume").await, 2);
    }

    #[tokio::test]
    async fn test_purge_listing_failure_is_fatal() {
        let cluster = Arc::new(
            SimulatedCluster::builder()
                .volume("svm1", "vol1")
                .failing_operation("list_volumes")
                .build(),
        );
        let manager = CloneLifecycleManager::new(cluster);

        assert_matches!(
            manager.purge_clones("svm1", "vol1").await,
            Err(Error::RequestFailed { .. })
        );
    }

    #[tokio::test]
    async fn test_create_clone_of_missing_parent() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("svm1").build());
        let manager = CloneLifecycleManager::new(cluster.clone());
        let svm = ResourceRef::new("svm-svm1", "svm1");

        let err = manager
            .create_clone(&svm, "vol1", "vol1_clone", None)
            .await
            .unwrap_err();

        assert_matches!(err, Error::NotFound { .. });
        assert_eq!(cluster.call_count("create_clone").await, 0);
    }

    #[tokio::test]
    async fn test_create_clone_sets_parent() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("svm1", "vol1").build());
        let manager = CloneLifecycleManager::new(cluster.clone());
        let svm = ResourceRef::new("svm-svm1", "svm1");

        let clone = manager
            .create_clone(&svm, "vol1", "vol1_clone", Some("/vol1_clone"))
            .await
            .unwrap();

        assert!(clone.is_flexclone());
        assert_eq!(clone.parent_volume_name(), Some("vol1"));
        assert_eq!(clone.junction_path(), Some("/vol1_clone"));
    }
}
