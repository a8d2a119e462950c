//! Volume configuration
//!
//! Create, update, show and list NAS volumes of one SVM.

use crate::domain::ports::{
    NasSettings, SecurityStyle, UnixPermissions, Volume, VolumeFilter, VolumePortRef, VolumeSpec,
};
use crate::error::{Error, Result};
use crate::provisioning::ApplyOutcome;
use tracing::{info, warn};

const MIB: u64 = 1024 * 1024;

/// Parameters of a new volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCreateOptions {
    pub name: String,
    pub aggregate: String,
    pub size_mb: u64,
    /// Defaults to `/<name>`
    pub junction_path: Option<String>,
    pub security_style: SecurityStyle,
    pub unix_permissions: UnixPermissions,
    pub uid: u32,
    pub gid: u32,
    pub export_policy: String,
    pub snapshot_policy: String,
}

impl VolumeCreateOptions {
    /// Options with the usual defaults: unix style, 0755, root ownership and
    /// the `default` export and snapshot policies
    pub fn new(name: impl Into<String>, aggregate: impl Into<String>, size_mb: u64) -> Self {
        Self {
            name: name.into(),
            aggregate: aggregate.into(),
            size_mb,
            junction_path: None,
            security_style: SecurityStyle::Unix,
            unix_permissions: UnixPermissions::DEFAULT,
            uid: 0,
            gid: 0,
            export_policy: "default".to_string(),
            snapshot_policy: "default".to_string(),
        }
    }

    fn into_spec(self, svm_name: &str) -> Result<VolumeSpec> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("volume name must not be empty".into()));
        }
        if self.size_mb == 0 {
            return Err(Error::Validation("volume size must be at least 1 MiB".into()));
        }
        let size_bytes = self.size_mb.checked_mul(MIB).ok_or_else(|| {
            Error::Validation(format!("volume size of {} MiB is too large", self.size_mb))
        })?;
        let path = self
            .junction_path
            .unwrap_or_else(|| format!("/{}", self.name));
        if !path.starts_with('/') {
            return Err(Error::Validation(format!(
                "junction path '{}' must start with '/'",
                path
            )));
        }

        Ok(VolumeSpec {
            svm_name: svm_name.to_string(),
            name: self.name,
            aggregate: self.aggregate,
            size_bytes,
            nas: NasSettings {
                path: Some(path),
                security_style: Some(self.security_style),
                unix_permissions: Some(self.unix_permissions),
                uid: Some(self.uid),
                gid: Some(self.gid),
                export_policy: Some(self.export_policy),
            },
            snapshot_policy: self.snapshot_policy,
        })
    }
}

/// Volume operations scoped to one SVM
pub struct VolumeManager {
    volumes: VolumePortRef,
    svm_name: String,
}

impl VolumeManager {
    pub fn new(volumes: VolumePortRef, svm_name: impl Into<String>) -> Self {
        Self {
            volumes,
            svm_name: svm_name.into(),
        }
    }

    /// Create a volume unless one with the same name exists
    ///
    /// Returns the existing volume with [`ApplyOutcome::AlreadyExists`] in
    /// that case.
    pub async fn create(&self, options: VolumeCreateOptions) -> Result<(ApplyOutcome, Volume)> {
        if let Some(existing) = self
            .volumes
            .find_volume(&self.svm_name, &options.name)
            .await?
        {
            warn!("Volume '{}' already exists in {}", existing.name, self.svm_name);
            return Ok((ApplyOutcome::AlreadyExists, existing));
        }

        let spec = options.into_spec(&self.svm_name)?;
        info!(
            "Creating volume '{}' on {} ({} bytes)",
            spec.name, spec.aggregate, spec.size_bytes
        );
        let volume = self.volumes.create_volume(&spec).await?;

        info!(
            "Volume '{}' created: path {}, style {}, permissions {}, uid {}, gid {}",
            volume.name,
            spec.nas.path.as_deref().unwrap_or("-"),
            spec.nas
                .security_style
                .map(|s| s.to_string())
                .unwrap_or_default(),
            spec.nas
                .unix_permissions
                .map(|p| p.to_string())
                .unwrap_or_default(),
            spec.nas.uid.unwrap_or(0),
            spec.nas.gid.unwrap_or(0)
        );
        Ok((ApplyOutcome::Created, volume))
    }

    /// Patch the NAS settings given in `update`
    pub async fn update(&self, name: &str, update: &NasSettings) -> Result<ApplyOutcome> {
        let volume = self.info(name).await?;

        let current = volume.nas.clone().unwrap_or_default();
        let changes = NasSettings {
            path: update.path.clone().filter(|p| current.path.as_ref() != Some(p)),
            security_style: update
                .security_style
                .filter(|s| current.security_style != Some(*s)),
            unix_permissions: update
                .unix_permissions
                .filter(|p| current.unix_permissions != Some(*p)),
            uid: update.uid.filter(|u| current.uid != Some(*u)),
            gid: update.gid.filter(|g| current.gid != Some(*g)),
            export_policy: update
                .export_policy
                .clone()
                .filter(|e| current.export_policy.as_ref() != Some(e)),
        };

        if changes.is_empty() {
            if update.is_empty() {
                warn!("No updates specified for volume '{}'", name);
            } else {
                info!("Volume '{}' already has the requested settings", name);
            }
            return Ok(ApplyOutcome::Unchanged);
        }

        self.volumes.update_volume_nas(&volume.id, &changes).await?;
        info!("Volume '{}' updated: {:?}", name, changes);
        Ok(ApplyOutcome::Updated)
    }

    pub async fn info(&self, name: &str) -> Result<Volume> {
        self.volumes
            .find_volume(&self.svm_name, name)
            .await?
            .ok_or_else(|| Error::not_found("Volume", format!("{}:{}", self.svm_name, name)))
    }

    pub async fn list(&self) -> Result<Vec<Volume>> {
        let volumes = self
            .volumes
            .list_volumes(&VolumeFilter::in_svm(&self.svm_name))
            .await?;
        info!("Found {} volume(s) in {}", volumes.len(), self.svm_name);
        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontap::SimulatedCluster;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn manager(cluster: &Arc<SimulatedCluster>) -> VolumeManager {
        VolumeManager::new(cluster.clone(), "svm1")
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("svm1").build());

        let (outcome, volume) = manager(&cluster)
            .create(VolumeCreateOptions::new("data", "aggr1", 1024))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(volume.size_bytes, Some(1024 * MIB));
        assert_eq!(volume.junction_path(), Some("/data"));
        let nas = volume.nas.unwrap();
        assert_eq!(nas.security_style, Some(SecurityStyle::Unix));
        assert_eq!(nas.unix_permissions.map(|p| p.bits()), Some(0o755));
        assert_eq!(nas.export_policy.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_create_existing_volume() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("svm1", "data").build());

        let (outcome, _) = manager(&cluster)
            .create(VolumeCreateOptions::new("data", "aggr1", 1024))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::AlreadyExists);
        assert_eq!(cluster.call_count("create_volume").await, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_size() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("svm1").build());

        let result = manager(&cluster)
            .create(VolumeCreateOptions::new("data", "aggr1", 0))
            .await;
        assert_matches!(result, Err(Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_only_sends_changes() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("svm1").build());
        let manager = manager(&cluster);
        manager
            .create(VolumeCreateOptions::new("data", "aggr1", 64))
            .await
            .unwrap();

        let update = NasSettings {
            unix_permissions: Some("---rwxrwx---".parse().unwrap()),
            uid: Some(0),
            ..Default::default()
        };
        assert_eq!(
            manager.update("data", &update).await.unwrap(),
            ApplyOutcome::Updated
        );
        assert_eq!(
            manager.update("data", &update).await.unwrap(),
            ApplyOutcome::Unchanged
        );

        let volume = manager.info("data").await.unwrap();
        assert_eq!(
            volume.nas.unwrap().unix_permissions.map(|p| p.bits()),
            Some(0o770)
        );
        assert_eq!(cluster.call_count("update_volume_nas").await, 1);
    }

    #[tokio::test]
    async fn test_update_without_fields_is_unchanged() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("svm1", "data").build());

        let outcome = manager(&cluster)
            .update("data", &NasSettings::default())
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_update_missing_volume() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("svm1").build());

        let update = NasSettings {
            uid: Some(1000),
            ..Default::default()
        };
        assert_matches!(
            manager(&cluster).update("nope", &update).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_svm() {
        let cluster = Arc::new(
            SimulatedCluster::builder()
                .volume("svm1", "a")
                .volume("svm1", "b")
                .volume("svm2", "c")
                .build(),
        );

        let names: Vec<String> = manager(&cluster)
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"c".to_string()));
    }
}
