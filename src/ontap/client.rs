//! ONTAP REST Client
//!
//! Implements every domain port over the cluster's management API
//! (`https://<endpoint>/api`). Writes that the cluster accepts as a job are
//! confirmed by polling `/cluster/jobs/{uuid}` before the call returns.
//! No request is retried here.

use crate::domain::ports::{
    Bucket, BucketRequest, Certificate, CifsShare, CloneRequest, LdapConfig, MappingDirection,
    NameMapping, NasServicesPort, NasSettings, NfsSettings, NsSwitch, ObjectServer,
    ObjectServerRequest, ObjectStorePort, RelationshipState, ReplicationPort,
    ReplicationRelationship, ResourceRef, ShareAcl, Svm, UnixGroup, UnixUser, Volume,
    VolumeFilter, VolumePort, VolumeSpec,
};
use crate::error::{Error, Result};
use crate::ontap::records::{
    BucketRecord, CertificateRecord, CifsShareRecord, Collection, ErrorEnvelope, JobRecord,
    JobResponse, LdapRecord, NameMappingRecord, NasRecord, NfsProtocolRecord, NfsServiceRecord,
    S3ServiceRecord, ShareAclRecord, SnapmirrorRecord, SvmRecord, UnixGroupRecord,
    UnixUserRecord, UuidName, VolumeRecord, SNAPMIRROR_FIELDS, VOLUME_FIELDS,
};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SVM_FIELDS: &str = "uuid,name,cifs.allowed,cifs.enabled,cifs.ad_domain.fqdn";
const S3_SERVICE_FIELDS: &str = "name,enabled,is_http_enabled,is_https_enabled,port,secure_port,svm.uuid,svm.name,certificate.uuid,certificate.name,buckets.name,buckets.uuid,buckets.nas_path,buckets.volume.name,buckets.volume.uuid,buckets.type,buckets.comment";

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the management API
#[derive(Debug, Clone)]
pub struct OntapClientConfig {
    /// Management endpoint: a host name, an IP or a full `https://` URL
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Verify the endpoint's TLS certificate
    pub verify_tls: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Interval between job status reads
    pub job_poll_interval: Duration,
    /// Upper bound on waiting for a single job
    pub job_timeout: Duration,
}

impl Default for OntapClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: "fsxadmin".to_string(),
            password: String::new(),
            // FSx/ONTAP management endpoints ship self-signed certificates
            verify_tls: false,
            request_timeout: Duration::from_secs(60),
            job_poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
        }
    }
}

impl OntapClientConfig {
    /// `https://<endpoint>/api`, tolerating endpoints given as URLs
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        let with_scheme = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };

        if with_scheme.ends_with("/api") {
            with_scheme
        } else {
            format!("{}/api", with_scheme)
        }
    }
}

// =============================================================================
// ONTAP Client
// =============================================================================

/// Client for the ONTAP management REST API
pub struct OntapClient {
    config: OntapClientConfig,
    http: reqwest::Client,
    base_url: String,
}

impl OntapClient {
    /// Create a new client; no request is sent until a port method is called
    pub fn new(config: OntapClientConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::Configuration(
                "management endpoint must not be empty".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        let base_url = config.base_url();

        info!("ONTAP client targeting {}", base_url);

        Ok(Self {
            config,
            http,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!("{} {}{}", method, self.base_url, path);
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(ACCEPT, "application/json")
    }

    /// Turn a non-2xx response into [`Error::RequestFailed`]
    async fn failure(operation: &str, response: Response) -> Error {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let cause = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => envelope.error.describe(),
            Err(_) if text.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("no response body")
                .to_string(),
            Err(_) => text,
        };

        Error::RequestFailed {
            operation: operation.to_string(),
            status: Some(status.as_u16()),
            cause,
        }
    }

    async fn get_collection<T, Q>(&self, operation: &str, path: &str, query: &Q) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self.request(Method::GET, path).query(query).send().await?;
        if !response.status().is_success() {
            return Err(Self::failure(operation, response).await);
        }

        let collection: Collection<T> = response.json().await?;
        Ok(collection.records)
    }

    /// Collection lookup expected to match at most one record
    async fn find_unique<T, Q>(&self, operation: &str, path: &str, query: &Q) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut records: Vec<T> = self.get_collection(operation, path, query).await?;
        match records.len() {
            0 | 1 => Ok(records.pop()),
            n => Err(Error::PreconditionFailed(format!(
                "{} matched {} records, expected at most one",
                operation, n
            ))),
        }
    }

    /// Single-record read; 404 means absent
    async fn get_record<T, Q>(&self, operation: &str, path: &str, query: &Q) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self.request(Method::GET, path).query(query).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure(operation, response).await);
        }

        Ok(Some(response.json().await?))
    }

    /// Send a write and, when the cluster hands back a job, wait for it
    async fn submit(&self, operation: &str, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::failure(operation, response).await);
        }

        let body = response.text().await?;

        // 202 means the write runs as a job; its reference is required
        if status == StatusCode::ACCEPTED {
            let accepted: JobResponse = serde_json::from_str(&body)?;
            return match accepted.job {
                Some(job) => self.wait_for_job(operation, &job.uuid).await,
                None => Err(Error::RequestFailed {
                    operation: operation.to_string(),
                    status: Some(status.as_u16()),
                    cause: "request accepted without a job reference".to_string(),
                }),
            };
        }

        if body.trim().is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<JobResponse>(&body) {
            Ok(JobResponse { job: Some(job) }) => self.wait_for_job(operation, &job.uuid).await,
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("'{}' returned {} with an unreadable body: {}", operation, status, e);
                Ok(())
            }
        }
    }

    async fn wait_for_job(&self, operation: &str, job_uuid: &str) -> Result<()> {
        let started = Instant::now();
        let path = format!("/cluster/jobs/{}", job_uuid);

        loop {
            let job: JobRecord = self
                .get_record("read job", &path, &[("fields", "uuid,state,message,code")])
                .await?
                .ok_or_else(|| Error::not_found("Job", job_uuid))?;

            if job.is_finished() {
                if job.is_success() {
                    debug!("Job {} for '{}' completed", job.uuid, operation);
                    return Ok(());
                }
                return Err(Error::RequestFailed {
                    operation: operation.to_string(),
                    status: None,
                    cause: match (job.message, job.code) {
                        (Some(message), Some(code)) => format!("{} (job code {})", message, code),
                        (Some(message), None) => message,
                        (None, _) => format!("job {} ended in state {}", job.uuid, job.state),
                    },
                });
            }

            if started.elapsed() >= self.config.job_timeout {
                return Err(Error::Timeout {
                    operation: format!("job {} ({})", job_uuid, operation),
                    waited: started.elapsed(),
                });
            }

            debug!("Job {} is {}, polling again", job.uuid, job.state);
            tokio::time::sleep(self.config.job_poll_interval).await;
        }
    }

    async fn require_volume(&self, svm_name: &str, name: &str) -> Result<Volume> {
        self.find_volume(svm_name, name)
            .await?
            .ok_or_else(|| Error::not_found("Volume", format!("{}:{}", svm_name, name)))
    }
}

fn svm_body(svm: &ResourceRef) -> serde_json::Value {
    serde_json::to_value(UuidName::from(svm)).unwrap_or_else(|_| json!({ "uuid": svm.id }))
}

fn share_acls_path(svm: &ResourceRef, share: &str) -> String {
    format!(
        "/protocols/cifs/shares/{}/{}/acls",
        svm.id,
        urlencoding::encode(share)
    )
}

// =============================================================================
// Replication
// =============================================================================

#[async_trait]
impl ReplicationPort for OntapClient {
    async fn find_relationship(
        &self,
        destination_path: &str,
    ) -> Result<Option<ReplicationRelationship>> {
        let record: Option<SnapmirrorRecord> = self
            .find_unique(
                "find snapmirror relationship",
                "/snapmirror/relationships",
                &[
                    ("destination.path", destination_path),
                    ("fields", SNAPMIRROR_FIELDS),
                ],
            )
            .await?;

        record.map(ReplicationRelationship::try_from).transpose()
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<ReplicationRelationship>> {
        let record: Option<SnapmirrorRecord> = self
            .get_record(
                "read snapmirror relationship",
                &format!("/snapmirror/relationships/{}", id),
                &[("fields", SNAPMIRROR_FIELDS)],
            )
            .await?;

        record.map(ReplicationRelationship::try_from).transpose()
    }

    async fn update_relationship_state(
        &self,
        id: &str,
        state: RelationshipState,
    ) -> Result<ReplicationRelationship> {
        let operation = format!("set snapmirror relationship {} to {}", id, state);
        let request = self
            .request(Method::PATCH, &format!("/snapmirror/relationships/{}", id))
            .json(&json!({ "state": state.as_str() }));
        self.submit(&operation, request).await?;

        self.get_relationship(id)
            .await?
            .ok_or_else(|| Error::not_found("SnapmirrorRelationship", id))
    }
}

// =============================================================================
// Volumes
// =============================================================================

#[async_trait]
impl VolumePort for OntapClient {
    async fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>> {
        let mut query: Vec<(&str, String)> = vec![("fields", VOLUME_FIELDS.to_string())];
        if let Some(svm) = &filter.svm_name {
            query.push(("svm.name", svm.clone()));
        }
        if let Some(name) = &filter.name {
            query.push(("name", name.clone()));
        }
        if let Some(flag) = filter.is_flexclone {
            query.push(("clone.is_flexclone", flag.to_string()));
        }
        if let Some(parent) = &filter.parent_volume_name {
            query.push(("clone.parent_volume.name", parent.clone()));
        }

        let records: Vec<VolumeRecord> = self
            .get_collection("list volumes", "/storage/volumes", &query)
            .await?;

        records.into_iter().map(Volume::try_from).collect()
    }

    async fn find_volume(&self, svm_name: &str, name: &str) -> Result<Option<Volume>> {
        let record: Option<VolumeRecord> = self
            .find_unique(
                "find volume",
                "/storage/volumes",
                &[("svm.name", svm_name), ("name", name), ("fields", VOLUME_FIELDS)],
            )
            .await?;

        record.map(Volume::try_from).transpose()
    }

    async fn delete_volume(&self, id: &str, force: bool) -> Result<()> {
        let request = self
            .request(Method::DELETE, &format!("/storage/volumes/{}", id))
            .query(&[("force", force)]);
        self.submit(&format!("delete volume {}", id), request).await
    }

    async fn create_clone(&self, request: &CloneRequest) -> Result<Volume> {
        let mut body = json!({
            "svm": svm_body(&request.parent_svm),
            "name": request.clone_name,
            "clone": {
                "is_flexclone": true,
                "parent_svm": svm_body(&request.parent_svm),
                "parent_volume": {
                    "name": request.parent_volume.name,
                    "uuid": request.parent_volume.id,
                },
            },
        });
        if let Some(path) = &request.junction_path {
            body["nas"] = json!({ "path": path });
        }

        let operation = format!(
            "clone volume {} as {}",
            request.parent_volume.name, request.clone_name
        );
        let post = self.request(Method::POST, "/storage/volumes").json(&body);
        self.submit(&operation, post).await?;

        self.require_volume(&request.parent_svm.name, &request.clone_name)
            .await
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<Volume> {
        let body = json!({
            "svm": { "name": spec.svm_name },
            "name": spec.name,
            "aggregates": [{ "name": spec.aggregate }],
            "size": spec.size_bytes,
            "nas": NasRecord::from(&spec.nas),
            "snapshot_policy": { "name": spec.snapshot_policy },
        });

        let post = self.request(Method::POST, "/storage/volumes").json(&body);
        self.submit(&format!("create volume {}", spec.name), post)
            .await?;

        self.require_volume(&spec.svm_name, &spec.name).await
    }

    async fn update_volume_nas(&self, id: &str, update: &NasSettings) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/storage/volumes/{}", id))
            .json(&json!({ "nas": NasRecord::from(update) }));
        self.submit(&format!("update NAS settings of volume {}", id), request)
            .await
    }
}

// =============================================================================
// NAS services
// =============================================================================

#[async_trait]
impl NasServicesPort for OntapClient {
    async fn find_svm(&self, name: &str) -> Result<Option<Svm>> {
        let record: Option<SvmRecord> = self
            .find_unique("find SVM", "/svm/svms", &[("name", name), ("fields", SVM_FIELDS)])
            .await?;
        Ok(record.map(Svm::from))
    }

    async fn update_nsswitch(&self, svm: &ResourceRef, nsswitch: &NsSwitch) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/svm/svms/{}", svm.id))
            .json(&json!({ "nsswitch": nsswitch }));
        self.submit(&format!("update name service switch of {}", svm.name), request)
            .await
    }

    async fn get_nfs_service(&self, svm: &ResourceRef) -> Result<Option<NfsSettings>> {
        let record: Option<NfsServiceRecord> = self
            .get_record(
                "read NFS service",
                &format!("/protocols/nfs/services/{}", svm.id),
                &[("fields", "protocol")],
            )
            .await?;
        Ok(record.map(NfsSettings::from))
    }

    async fn update_nfs_service(&self, svm: &ResourceRef, settings: &NfsSettings) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/protocols/nfs/services/{}", svm.id))
            .json(&json!({ "protocol": NfsProtocolRecord::from(settings) }));
        self.submit(&format!("update NFS service of {}", svm.name), request)
            .await
    }

    async fn get_ldap(&self, svm: &ResourceRef) -> Result<Option<LdapConfig>> {
        let record: Option<LdapRecord> = self
            .get_record(
                "read LDAP configuration",
                &format!("/name-services/ldap/{}", svm.id),
                &[("fields", "base_dn,ad_domain,bind_dn,schema,port,ldap_enabled")],
            )
            .await?;
        Ok(record.map(LdapConfig::from))
    }

    async fn create_ldap(&self, svm: &ResourceRef, config: &LdapConfig) -> Result<()> {
        let mut body = serde_json::to_value(LdapRecord::from(config))?;
        body["svm"] = svm_body(svm);

        let request = self.request(Method::POST, "/name-services/ldap").json(&body);
        self.submit(&format!("create LDAP configuration for {}", svm.name), request)
            .await
    }

    async fn update_ldap(&self, svm: &ResourceRef, config: &LdapConfig) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/name-services/ldap/{}", svm.id))
            .json(&LdapRecord::from(config));
        self.submit(&format!("update LDAP configuration of {}", svm.name), request)
            .await
    }

    async fn list_name_mappings(
        &self,
        svm: &ResourceRef,
        direction: Option<MappingDirection>,
    ) -> Result<Vec<NameMapping>> {
        let mut query = vec![
            ("svm.uuid", svm.id.as_str()),
            ("fields", "direction,index,pattern,replacement"),
        ];
        if let Some(direction) = direction {
            query.push(("direction", direction.as_str()));
        }

        let records: Vec<NameMappingRecord> = self
            .get_collection("list name mappings", "/name-services/name-mappings", &query)
            .await?;
        Ok(records
            .into_iter()
            .filter_map(NameMappingRecord::into_mapping)
            .collect())
    }

    async fn create_name_mapping(&self, svm: &ResourceRef, mapping: &NameMapping) -> Result<()> {
        let body = json!({
            "svm": svm_body(svm),
            "direction": mapping.direction.as_str(),
            "index": mapping.index,
            "pattern": mapping.pattern,
            "replacement": mapping.replacement,
        });
        let request = self
            .request(Method::POST, "/name-services/name-mappings")
            .json(&body);
        self.submit(&format!("create name mapping {}", mapping.pattern), request)
            .await
    }

    async fn find_unix_user(&self, svm: &ResourceRef, name: &str) -> Result<Option<UnixUser>> {
        let record: Option<UnixUserRecord> = self
            .find_unique(
                "find UNIX user",
                "/name-services/unix-users",
                &[
                    ("svm.uuid", svm.id.as_str()),
                    ("name", name),
                    ("fields", "name,id,primary_gid"),
                ],
            )
            .await?;
        Ok(record.map(UnixUser::from))
    }

    async fn create_unix_user(&self, svm: &ResourceRef, user: &UnixUser) -> Result<()> {
        let body = json!({
            "svm": svm_body(svm),
            "name": user.name,
            "id": user.id,
            "primary_gid": user.primary_gid,
        });
        let request = self
            .request(Method::POST, "/name-services/unix-users")
            .json(&body);
        self.submit(&format!("create UNIX user {}", user.name), request)
            .await
    }

    async fn find_unix_group(&self, svm: &ResourceRef, name: &str) -> Result<Option<UnixGroup>> {
        let record: Option<UnixGroupRecord> = self
            .find_unique(
                "find UNIX group",
                "/name-services/unix-groups",
                &[
                    ("svm.uuid", svm.id.as_str()),
                    ("name", name),
                    ("fields", "name,id"),
                ],
            )
            .await?;
        Ok(record.map(UnixGroup::from))
    }

    async fn create_unix_group(&self, svm: &ResourceRef, group: &UnixGroup) -> Result<()> {
        let body = json!({
            "svm": svm_body(svm),
            "name": group.name,
            "id": group.id,
        });
        let request = self
            .request(Method::POST, "/name-services/unix-groups")
            .json(&body);
        self.submit(&format!("create UNIX group {}", group.name), request)
            .await
    }

    async fn find_cifs_share(&self, svm: &ResourceRef, name: &str) -> Result<Option<CifsShare>> {
        let record: Option<CifsShareRecord> = self
            .find_unique(
                "find CIFS share",
                "/protocols/cifs/shares",
                &[
                    ("svm.uuid", svm.id.as_str()),
                    ("name", name),
                    ("fields", "name,path,properties"),
                ],
            )
            .await?;
        Ok(record.map(CifsShare::from))
    }

    async fn create_cifs_share(&self, svm: &ResourceRef, share: &CifsShare) -> Result<()> {
        let body = json!({
            "svm": svm_body(svm),
            "name": share.name,
            "path": share.path,
            "properties": share.properties,
        });
        let request = self.request(Method::POST, "/protocols/cifs/shares").json(&body);
        self.submit(&format!("create CIFS share {}", share.name), request)
            .await
    }

    async fn find_share_acl(
        &self,
        svm: &ResourceRef,
        share: &str,
        user_or_group: &str,
    ) -> Result<Option<ShareAcl>> {
        let lookup = self
            .find_unique::<ShareAclRecord, _>(
                "find share ACL",
                &share_acls_path(svm, share),
                &[
                    ("user_or_group", user_or_group),
                    ("fields", "user_or_group,permission,type"),
                ],
            )
            .await;

        match lookup {
            Ok(record) => Ok(record.map(ShareAcl::from)),
            // The share itself is missing, so no ACL entry can exist
            Err(Error::RequestFailed {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_share_acl(&self, svm: &ResourceRef, share: &str, acl: &ShareAcl) -> Result<()> {
        let body = json!({
            "user_or_group": acl.user_or_group,
            "permission": acl.permission,
            "type": acl.acl_type,
        });
        let request = self
            .request(Method::POST, &share_acls_path(svm, share))
            .json(&body);
        self.submit(
            &format!("grant {} on share {}", acl.user_or_group, share),
            request,
        )
        .await
    }

    async fn delete_share_acl(&self, svm: &ResourceRef, share: &str, acl: &ShareAcl) -> Result<()> {
        let path = format!(
            "{}/{}/{}",
            share_acls_path(svm, share),
            urlencoding::encode(&acl.user_or_group),
            urlencoding::encode(&acl.acl_type)
        );
        let request = self.request(Method::DELETE, &path);
        self.submit(
            &format!("revoke {} on share {}", acl.user_or_group, share),
            request,
        )
        .await
    }
}

// =============================================================================
// Object storage
// =============================================================================

#[async_trait]
impl ObjectStorePort for OntapClient {
    async fn list_svms(&self) -> Result<Vec<Svm>> {
        let records: Vec<SvmRecord> = self
            .get_collection("list SVMs", "/svm/svms", &[("fields", SVM_FIELDS)])
            .await?;
        Ok(records.into_iter().map(Svm::from).collect())
    }

    async fn list_certificates(&self, svm_id: &str) -> Result<Vec<Certificate>> {
        let records: Vec<CertificateRecord> = self
            .get_collection(
                "list certificates",
                "/security/certificates",
                &[
                    ("svm.uuid", svm_id),
                    ("type", "server"),
                    ("fields", "uuid,name,common_name,serial_number"),
                ],
            )
            .await?;
        Ok(records.into_iter().map(Certificate::from).collect())
    }

    async fn create_certificate(&self, svm_id: &str, common_name: &str) -> Result<Certificate> {
        let body = json!({
            "common_name": common_name,
            "type": "server",
            "svm": { "uuid": svm_id },
        });
        let request = self
            .request(Method::POST, "/security/certificates")
            .json(&body);
        self.submit(&format!("create certificate {}", common_name), request)
            .await?;

        self.list_certificates(svm_id)
            .await?
            .into_iter()
            .find(|c| c.common_name == common_name)
            .ok_or_else(|| Error::not_found("Certificate", common_name))
    }

    async fn list_object_servers(&self) -> Result<Vec<ObjectServer>> {
        let records: Vec<S3ServiceRecord> = self
            .get_collection(
                "list S3 services",
                "/protocols/s3/services",
                &[("fields", S3_SERVICE_FIELDS)],
            )
            .await?;
        Ok(records.into_iter().map(ObjectServer::from).collect())
    }

    async fn create_object_server(&self, request: &ObjectServerRequest) -> Result<ObjectServer> {
        let body = json!({
            "certificate": { "uuid": request.certificate_id },
            "comment": request.name,
            "enabled": true,
            "is_http_enabled": true,
            "is_https_enabled": true,
            "name": request.name,
            "port": request.port,
            "secure_port": request.secure_port,
            "svm": { "uuid": request.svm_id },
        });
        let post = self
            .request(Method::POST, "/protocols/s3/services")
            .json(&body);
        self.submit(&format!("create S3 service {}", request.name), post)
            .await?;

        self.list_object_servers()
            .await?
            .into_iter()
            .find(|s| s.svm.id == request.svm_id)
            .ok_or_else(|| Error::not_found("S3Service", &request.name))
    }

    async fn create_bucket(&self, request: &BucketRequest) -> Result<Bucket> {
        let body = json!({
            "comment": request.comment,
            "name": request.name,
            "nas_path": request.nas_path,
            "svm": { "uuid": request.svm_id },
            "type": "nas",
        });
        let post = self.request(Method::POST, "/protocols/s3/buckets").json(&body);
        self.submit(&format!("create bucket {}", request.name), post)
            .await?;

        let record: Option<BucketRecord> = self
            .find_unique(
                "find bucket",
                &format!("/protocols/s3/services/{}/buckets", request.svm_id),
                &[
                    ("name", request.name.as_str()),
                    ("fields", "uuid,name,nas_path,volume,type,comment"),
                ],
            )
            .await?;
        record
            .map(Bucket::from)
            .ok_or_else(|| Error::not_found("Bucket", &request.name))
    }
}
