//! Object storage endpoint provisioning
//!
//! Exposes NAS volumes over S3: one object server per SVM (HTTP and HTTPS
//! with a server certificate) and `nas` buckets backed by a volume's
//! junction path.

use crate::domain::ports::{
    Bucket, BucketRequest, Certificate, ObjectServer, ObjectServerRequest, ObjectStorePortRef,
    Svm, VolumePortRef,
};
use crate::error::{Error, Result};
use crate::provisioning::ApplyOutcome;
use serde::Serialize;
use tracing::{debug, info, warn};

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// An SVM and its object server, if it has one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvmStatus {
    pub svm: Svm,
    pub object_server: Option<ObjectServer>,
}

/// Certificate, server and bucket provisioning
pub struct ObjectStoreProvisioner {
    store: ObjectStorePortRef,
    volumes: VolumePortRef,
}

impl ObjectStoreProvisioner {
    pub fn new(store: ObjectStorePortRef, volumes: VolumePortRef) -> Self {
        Self { store, volumes }
    }

    /// SVMs with their CIFS domain and object server
    pub async fn status(&self, svm_name: Option<&str>) -> Result<Vec<SvmStatus>> {
        let svms = self.store.list_svms().await?;
        let mut servers = self.store.list_object_servers().await?;

        let statuses: Vec<SvmStatus> = svms
            .into_iter()
            .filter(|svm| svm_name.map_or(true, |name| svm.name == name))
            .map(|svm| {
                let object_server = servers
                    .iter()
                    .position(|s| s.svm.id == svm.id)
                    .map(|i| servers.swap_remove(i));
                SvmStatus { svm, object_server }
            })
            .collect();

        if let Some(name) = svm_name {
            if statuses.is_empty() {
                return Err(Error::not_found("Svm", name));
            }
        }
        Ok(statuses)
    }

    /// Make sure the SVM has an object server
    ///
    /// A server certificate with `common_name` is reused when one exists and
    /// created otherwise.
    pub async fn enable(
        &self,
        svm_name: &str,
        server_name: &str,
        common_name: &str,
    ) -> Result<(ApplyOutcome, ObjectServer)> {
        let svm = self.require_svm(svm_name).await?;

        if let Some(server) = self.server_of(&svm).await? {
            warn!(
                "SVM {} already has object server {}",
                svm.name, server.name
            );
            return Ok((ApplyOutcome::AlreadyExists, server));
        }

        let certificate = self.ensure_certificate(&svm, common_name).await?;
        info!(
            "Creating object server {} on {} with certificate {}",
            server_name, svm.name, certificate.id
        );
        let server = self
            .store
            .create_object_server(&ObjectServerRequest {
                svm_id: svm.id.clone(),
                name: server_name.to_string(),
                certificate_id: certificate.id,
                port: HTTP_PORT,
                secure_port: HTTPS_PORT,
            })
            .await?;

        Ok((ApplyOutcome::Created, server))
    }

    /// Create a `nas` bucket exposing `volume_name`
    pub async fn create_bucket(
        &self,
        svm_name: &str,
        volume_name: &str,
        bucket_name: &str,
    ) -> Result<(ApplyOutcome, Bucket)> {
        if !is_valid_bucket_name(bucket_name) {
            return Err(Error::Validation(format!(
                "Invalid bucket name: {}. Must be 3-63 characters of lowercase letters, digits, \
                 hyphens or periods, start and end with a letter or digit and not look like an IP address",
                bucket_name
            )));
        }

        let svm = self.require_svm(svm_name).await?;
        let server = self.server_of(&svm).await?.ok_or_else(|| {
            Error::PreconditionFailed(format!(
                "SVM {} has no object server; enable S3 first",
                svm.name
            ))
        })?;

        if let Some(bucket) = server.buckets.into_iter().find(|b| b.name == bucket_name) {
            warn!("Bucket {} already exists on {}", bucket_name, svm.name);
            return Ok((ApplyOutcome::AlreadyExists, bucket));
        }

        let volume = self
            .volumes
            .find_volume(&svm.name, volume_name)
            .await?
            .ok_or_else(|| Error::not_found("Volume", format!("{}:{}", svm.name, volume_name)))?;
        let nas_path = volume.junction_path().ok_or_else(|| {
            Error::PreconditionFailed(format!(
                "volume {} has no junction path; mount it before exposing it over S3",
                volume.name
            ))
        })?;

        info!(
            "Creating bucket {} for {} ({})",
            bucket_name, volume.name, nas_path
        );
        let bucket = self
            .store
            .create_bucket(&BucketRequest {
                svm_id: svm.id.clone(),
                name: bucket_name.to_string(),
                nas_path: nas_path.to_string(),
                comment: format!("Bucket for {}", volume.name),
            })
            .await?;

        Ok((ApplyOutcome::Created, bucket))
    }

    async fn require_svm(&self, name: &str) -> Result<Svm> {
        self.store
            .list_svms()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found("Svm", name))
    }

    async fn server_of(&self, svm: &Svm) -> Result<Option<ObjectServer>> {
        Ok(self
            .store
            .list_object_servers()
            .await?
            .into_iter()
            .find(|s| s.svm.id == svm.id))
    }

    async fn ensure_certificate(&self, svm: &Svm, common_name: &str) -> Result<Certificate> {
        let existing = self
            .store
            .list_certificates(&svm.id)
            .await?
            .into_iter()
            .find(|c| c.common_name == common_name);

        match existing {
            Some(certificate) => {
                debug!("Reusing certificate {} for {}", certificate.id, common_name);
                Ok(certificate)
            }
            None => {
                info!("Creating server certificate for {}", common_name);
                self.store.create_certificate(&svm.id, common_name).await
            }
        }
    }
}

/// Validate an S3 bucket name
fn is_valid_bucket_name(name: &str) -> bool {
    // Must be 3-63 characters
    if name.len() < 3 || name.len() > 63 {
        return false;
    }

    let is_edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    // Must start and end with lowercase letter or number
    if !name.chars().next().map(is_edge).unwrap_or(false)
        || !name.chars().last().map(is_edge).unwrap_or(false)
    {
        return false;
    }

    // Can only contain lowercase letters, numbers, hyphens and periods
    if !name
        .chars()
        .all(|c| is_edge(c) || c == '-' || c == '.')
    {
        return false;
    }

    // No empty labels or labels starting/ending with a hyphen
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return false;
    }

    // Cannot be formatted as IP address
    if name.split('.').count() == 4 && name.split('.').all(|p| p.parse::<u8>().is_ok()) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontap::SimulatedCluster;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn provisioner(cluster: &Arc<SimulatedCluster>) -> ObjectStoreProvisioner {
        ObjectStoreProvisioner::new(cluster.clone(), cluster.clone())
    }

    #[test]
    fn test_bucket_names() {
        assert!(is_valid_bucket_name("my-bucket"));
        assert!(is_valid_bucket_name("bucket123"));
        assert!(is_valid_bucket_name("logs.2024"));
        assert!(!is_valid_bucket_name("My-Bucket")); // uppercase
        assert!(!is_valid_bucket_name("my_bucket")); // underscore
        assert!(!is_valid_bucket_name("ab")); // too short
        assert!(!is_valid_bucket_name("-bucket")); // starts with hyphen
        assert!(!is_valid_bucket_name("bucket-")); // ends with hyphen
        assert!(!is_valid_bucket_name("my..bucket"));
        assert!(!is_valid_bucket_name("my.-bucket"));
        assert!(!is_valid_bucket_name("192.168.1.1"));
        assert!(!is_valid_bucket_name(&"a".repeat(64)));
    }

    #[tokio::test]
    async fn test_enable_creates_certificate_and_server() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("fsx").build());

        let (outcome, server) = provisioner(&cluster)
            .enable("fsx", "fsx-s3", "fsx-s3.corp.example.com")
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(server.port, 80);
        assert_eq!(server.secure_port, 443);
        assert!(server.certificate.is_some());
        assert_eq!(cluster.call_count("create_certificate").await, 1);
    }

    #[tokio::test]
    async fn test_enable_reuses_certificate_and_server() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("fsx").build());
        let provisioner = provisioner(&cluster);
        provisioner
            .enable("fsx", "fsx-s3", "fsx-s3.corp.example.com")
            .await
            .unwrap();

        let (outcome, _) = provisioner
            .enable("fsx", "fsx-s3", "fsx-s3.corp.example.com")
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::AlreadyExists);
        assert_eq!(cluster.call_count("create_certificate").await, 1);
        assert_eq!(cluster.call_count("create_object_server").await, 1);
    }

    #[tokio::test]
    async fn test_bucket_on_mounted_volume() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("fsx", "vol1").build());
        let provisioner = provisioner(&cluster);
        provisioner.enable("fsx", "fsx-s3", "s3.example.com").await.unwrap();

        let (outcome, bucket) = provisioner
            .create_bucket("fsx", "vol1", "vol1-bucket")
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(bucket.nas_path.as_deref(), Some("/vol1"));
        assert_eq!(bucket.bucket_type.as_deref(), Some("nas"));

        let status = provisioner.status(Some("fsx")).await.unwrap();
        let server = status[0].object_server.as_ref().unwrap();
        assert_eq!(server.buckets.len(), 1);

        let (again, _) = provisioner
            .create_bucket("fsx", "vol1", "vol1-bucket")
            .await
            .unwrap();
        assert_eq!(again, ApplyOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_bucket_requires_junction_path() {
        let cluster = Arc::new(
            SimulatedCluster::builder()
                .unmounted_volume("fsx", "vol1")
                .build(),
        );
        let provisioner = provisioner(&cluster);
        provisioner.enable("fsx", "fsx-s3", "s3.example.com").await.unwrap();

        assert_matches!(
            provisioner.create_bucket("fsx", "vol1", "vol1-bucket").await,
            Err(Error::PreconditionFailed(_))
        );
        assert_eq!(cluster.call_count("create_bucket").await, 0);
    }

    #[tokio::test]
    async fn test_bucket_requires_server() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("fsx", "vol1").build());

        assert_matches!(
            provisioner(&cluster)
                .create_bucket("fsx", "vol1", "vol1-bucket")
                .await,
            Err(Error::PreconditionFailed(_))
        );
    }

    #[tokio::test]
    async fn test_invalid_bucket_name_makes_no_calls() {
        let cluster = Arc::new(SimulatedCluster::builder().volume("fsx", "vol1").build());

        assert_matches!(
            provisioner(&cluster)
                .create_bucket("fsx", "vol1", "Vol1_Bucket")
                .await,
            Err(Error::Validation(_))
        );
        assert!(cluster.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_unknown_svm() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("fsx").build());

        assert_matches!(
            provisioner(&cluster).status(Some("nope")).await,
            Err(Error::NotFound { .. })
        );
        assert_eq!(provisioner(&cluster).status(None).await.unwrap().len(), 1);
    }
}
