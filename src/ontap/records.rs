//! ONTAP REST wire records
//!
//! Serde shapes of the management API's JSON documents and their conversion
//! into domain types. Only the fields the client requests are modelled.

use crate::domain::ports::{
    Bucket, Certificate, CifsShare, CifsStatus, CloneInfo, LdapConfig, MappingDirection,
    NameMapping, NasSettings, NfsSettings, ObjectServer, ReplicationRelationship, ResourceRef,
    SecurityStyle, ShareAcl, SharePermission, Svm, Transfer, UnixGroup, UnixPermissions, UnixUser,
    Volume,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Envelopes
// =============================================================================

/// Collection response (`GET` on a collection endpoint)
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    #[serde(default)]
    pub num_records: Option<u64>,
}

/// Error document returned with non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

impl ErrorBody {
    pub fn describe(&self) -> String {
        match (&self.code, &self.target) {
            (Some(code), Some(target)) => format!("{} (code {}, target {})", self.message, code, target),
            (Some(code), None) => format!("{} (code {})", self.message, code),
            _ => self.message.clone(),
        }
    }
}

/// Body of a write accepted for asynchronous processing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobResponse {
    #[serde(default)]
    pub job: Option<JobLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobLink {
    pub uuid: String,
}

/// Cluster job as returned by `/cluster/jobs/{uuid}`
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    pub uuid: String,
    pub state: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

impl JobRecord {
    pub fn is_finished(&self) -> bool {
        matches!(self.state.as_str(), "success" | "failure" | "error")
    }

    pub fn is_success(&self) -> bool {
        self.state == "success"
    }
}

// =============================================================================
// Shared
// =============================================================================

/// `{uuid, name}` pair; either side may be omitted by the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UuidName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UuidName {
    fn into_ref(self) -> ResourceRef {
        ResourceRef::new(self.uuid.unwrap_or_default(), self.name.unwrap_or_default())
    }
}

impl From<&ResourceRef> for UuidName {
    fn from(value: &ResourceRef) -> Self {
        Self {
            uuid: Some(value.id.clone()),
            name: Some(value.name.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Named {
    #[serde(default)]
    pub name: Option<String>,
}

fn missing(kind: &str, field: &str) -> Error {
    Error::Internal(format!("{} record is missing '{}'", kind, field))
}

// =============================================================================
// SnapMirror
// =============================================================================

pub const SNAPMIRROR_FIELDS: &str =
    "uuid,source.path,destination.path,destination.svm,state,healthy,transfer.state,transfer.bytes_transferred";

#[derive(Debug, Clone, Deserialize)]
pub struct SnapmirrorEndpoint {
    pub path: String,
    #[serde(default)]
    pub svm: Option<UuidName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapmirrorTransfer {
    pub state: String,
    #[serde(default)]
    pub bytes_transferred: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapmirrorRecord {
    pub uuid: String,
    pub source: SnapmirrorEndpoint,
    pub destination: SnapmirrorEndpoint,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub transfer: Option<SnapmirrorTransfer>,
}

impl TryFrom<SnapmirrorRecord> for ReplicationRelationship {
    type Error = Error;

    fn try_from(record: SnapmirrorRecord) -> Result<Self> {
        let state = record
            .state
            .ok_or_else(|| missing("snapmirror relationship", "state"))?;
        let destination_svm = record
            .destination
            .svm
            .ok_or_else(|| missing("snapmirror relationship", "destination.svm"))?
            .into_ref();

        Ok(ReplicationRelationship {
            id: record.uuid,
            source_path: record.source.path,
            destination_path: record.destination.path,
            destination_svm,
            state: state.into(),
            transfer: record.transfer.map(|t| Transfer {
                state: t.state.into(),
                bytes_transferred: t.bytes_transferred,
            }),
            healthy: record.healthy,
        })
    }
}

// =============================================================================
// Volumes
// =============================================================================

pub const VOLUME_FIELDS: &str = "uuid,name,svm,clone.is_flexclone,clone.parent_volume,clone.parent_svm,nas,size,state,snapshot_policy,aggregates";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NasRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_permissions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_policy: Option<UuidName>,
}

impl From<&NasSettings> for NasRecord {
    fn from(nas: &NasSettings) -> Self {
        Self {
            path: nas.path.clone(),
            security_style: nas.security_style.map(|s| s.to_string()),
            unix_permissions: nas.unix_permissions.map(|p| p.wire_value()),
            uid: nas.uid,
            gid: nas.gid,
            export_policy: nas.export_policy.as_ref().map(|name| UuidName {
                uuid: None,
                name: Some(name.clone()),
            }),
        }
    }
}

impl NasRecord {
    fn into_settings(self) -> NasSettings {
        NasSettings {
            path: self.path,
            security_style: self
                .security_style
                .and_then(|s| s.parse::<SecurityStyle>().ok()),
            // Values outside the permission range are dropped rather than
            // failing the whole volume record
            unix_permissions: self
                .unix_permissions
                .and_then(|p| UnixPermissions::try_from(p).ok()),
            uid: self.uid,
            gid: self.gid,
            export_policy: self.export_policy.and_then(|p| p.name),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloneRecord {
    #[serde(default)]
    pub is_flexclone: Option<bool>,
    #[serde(default)]
    pub parent_volume: Option<UuidName>,
    #[serde(default)]
    pub parent_svm: Option<UuidName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRecord {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub svm: Option<UuidName>,
    #[serde(default)]
    pub clone: Option<CloneRecord>,
    #[serde(default)]
    pub nas: Option<NasRecord>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub snapshot_policy: Option<Named>,
    #[serde(default)]
    pub aggregates: Vec<Named>,
}

impl TryFrom<VolumeRecord> for Volume {
    type Error = Error;

    fn try_from(record: VolumeRecord) -> Result<Self> {
        let clone = match record.clone {
            Some(CloneRecord {
                is_flexclone: Some(true),
                parent_volume,
                parent_svm,
            }) => {
                let parent_volume = parent_volume.ok_or_else(|| {
                    Error::Internal(format!(
                        "FlexClone {} is reported without a parent volume",
                        record.name
                    ))
                })?;
                Some(CloneInfo {
                    parent_volume: parent_volume.into_ref(),
                    parent_svm: parent_svm.map(UuidName::into_ref),
                })
            }
            _ => None,
        };

        Ok(Volume {
            id: record.uuid,
            name: record.name,
            svm: record.svm.unwrap_or_default().into_ref(),
            clone,
            nas: record.nas.map(NasRecord::into_settings),
            size_bytes: record.size,
            state: record.state,
            snapshot_policy: record.snapshot_policy.and_then(|p| p.name),
            aggregates: record.aggregates.into_iter().filter_map(|a| a.name).collect(),
        })
    }
}

// =============================================================================
// SVMs and name services
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdDomainRecord {
    #[serde(default)]
    pub fqdn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SvmCifsRecord {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ad_domain: Option<AdDomainRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SvmRecord {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub cifs: Option<SvmCifsRecord>,
}

impl From<SvmRecord> for Svm {
    fn from(record: SvmRecord) -> Self {
        Svm {
            id: record.uuid,
            name: record.name,
            cifs: record.cifs.map(|c| CifsStatus {
                allowed: c.allowed,
                enabled: c.enabled,
                ad_domain: c.ad_domain.and_then(|d| d.fqdn),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NfsProtocolRecord {
    #[serde(default)]
    pub v3_enabled: bool,
    #[serde(default)]
    pub v4_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4_id_domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NfsServiceRecord {
    #[serde(default)]
    pub protocol: NfsProtocolRecord,
}

impl From<NfsServiceRecord> for NfsSettings {
    fn from(record: NfsServiceRecord) -> Self {
        NfsSettings {
            v3_enabled: record.protocol.v3_enabled,
            v4_enabled: record.protocol.v4_enabled,
            v4_id_domain: record.protocol.v4_id_domain,
        }
    }
}

impl From<&NfsSettings> for NfsProtocolRecord {
    fn from(settings: &NfsSettings) -> Self {
        Self {
            v3_enabled: settings.v3_enabled,
            v4_enabled: settings.v4_enabled,
            v4_id_domain: settings.v4_id_domain.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapRecord {
    pub base_dn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,
    #[serde(default)]
    pub schema: String,
    #[serde(default = "default_ldap_port")]
    pub port: u16,
    #[serde(default)]
    pub ldap_enabled: bool,
}

fn default_ldap_port() -> u16 {
    389
}

impl From<LdapRecord> for LdapConfig {
    fn from(record: LdapRecord) -> Self {
        LdapConfig {
            base_dn: record.base_dn,
            ad_domain: record.ad_domain,
            bind_dn: record.bind_dn,
            schema: record.schema,
            port: record.port,
            enabled: record.ldap_enabled,
        }
    }
}

impl From<&LdapConfig> for LdapRecord {
    fn from(config: &LdapConfig) -> Self {
        Self {
            base_dn: config.base_dn.clone(),
            ad_domain: config.ad_domain.clone(),
            bind_dn: config.bind_dn.clone(),
            schema: config.schema.clone(),
            port: config.port,
            ldap_enabled: config.enabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameMappingRecord {
    pub direction: String,
    pub index: u32,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

impl NameMappingRecord {
    /// Directions other than win/unix (`krb_unix`, `s3_win`, ...) are skipped
    pub fn into_mapping(self) -> Option<NameMapping> {
        let direction = match self.direction.as_str() {
            "win_unix" => MappingDirection::WinUnix,
            "unix_win" => MappingDirection::UnixWin,
            _ => return None,
        };
        Some(NameMapping {
            direction,
            index: self.index,
            pattern: self.pattern,
            replacement: self.replacement,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnixUserRecord {
    pub name: String,
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub primary_gid: u32,
}

impl From<UnixUserRecord> for UnixUser {
    fn from(record: UnixUserRecord) -> Self {
        UnixUser {
            name: record.name,
            id: record.id,
            primary_gid: record.primary_gid,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnixGroupRecord {
    pub name: String,
    #[serde(default)]
    pub id: u32,
}

impl From<UnixGroupRecord> for UnixGroup {
    fn from(record: UnixGroupRecord) -> Self {
        UnixGroup {
            name: record.name,
            id: record.id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CifsShareRecord {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub properties: Vec<String>,
}

impl From<CifsShareRecord> for CifsShare {
    fn from(record: CifsShareRecord) -> Self {
        CifsShare {
            name: record.name,
            path: record.path,
            properties: record.properties,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareAclRecord {
    pub user_or_group: String,
    pub permission: SharePermission,
    #[serde(default = "default_acl_type", rename = "type")]
    pub acl_type: String,
}

fn default_acl_type() -> String {
    "windows".to_string()
}

impl From<ShareAclRecord> for ShareAcl {
    fn from(record: ShareAclRecord) -> Self {
        ShareAcl {
            user_or_group: record.user_or_group,
            permission: record.permission,
            acl_type: record.acl_type,
        }
    }
}

// =============================================================================
// Object storage
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateRecord {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl From<CertificateRecord> for Certificate {
    fn from(record: CertificateRecord) -> Self {
        Certificate {
            id: record.uuid,
            name: record.name,
            common_name: record.common_name.unwrap_or_default(),
            serial_number: record.serial_number,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub nas_path: Option<String>,
    #[serde(default)]
    pub volume: Option<UuidName>,
    #[serde(default, rename = "type")]
    pub bucket_type: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl From<BucketRecord> for Bucket {
    fn from(record: BucketRecord) -> Self {
        Bucket {
            id: record.uuid,
            name: record.name,
            nas_path: record.nas_path,
            volume: record.volume.map(UuidName::into_ref),
            bucket_type: record.bucket_type,
            comment: record.comment,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3ServiceRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub svm: Option<UuidName>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub is_http_enabled: bool,
    #[serde(default)]
    pub is_https_enabled: bool,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub secure_port: u16,
    #[serde(default)]
    pub certificate: Option<UuidName>,
    #[serde(default)]
    pub buckets: Vec<BucketRecord>,
}

impl From<S3ServiceRecord> for ObjectServer {
    fn from(record: S3ServiceRecord) -> Self {
        ObjectServer {
            name: record.name,
            svm: record.svm.unwrap_or_default().into_ref(),
            enabled: record.enabled,
            http_enabled: record.is_http_enabled,
            https_enabled: record.is_https_enabled,
            port: record.port,
            secure_port: record.secure_port,
            certificate: record.certificate.map(UuidName::into_ref),
            buckets: record.buckets.into_iter().map(Bucket::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{RelationshipState, TransferState};
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_decode_snapmirror_record() {
        let body = json!({
            "records": [{
                "uuid": "4512e2d4-1234",
                "source": { "path": "fsx0svm0:vol_primary" },
                "destination": {
                    "path": "fsx0svm1:vol_secondary",
                    "svm": { "uuid": "svm-1", "name": "fsx0svm1" }
                },
                "state": "snapmirrored",
                "healthy": true,
                "transfer": { "state": "transferring", "bytes_transferred": 4096 }
            }],
            "num_records": 1
        });

        let collection: Collection<SnapmirrorRecord> = serde_json::from_value(body).unwrap();
        let rel = ReplicationRelationship::try_from(collection.records[0].clone()).unwrap();

        assert_eq!(rel.id, "4512e2d4-1234");
        assert_eq!(rel.state, RelationshipState::Snapmirrored);
        assert_eq!(rel.destination_svm.id, "svm-1");
        assert_eq!(rel.transfer_state(), Some(&TransferState::Transferring));
        assert!(rel.is_transferring());
    }

    #[test]
    fn test_snapmirror_without_transfer() {
        let record: SnapmirrorRecord = serde_json::from_value(json!({
            "uuid": "r1",
            "source": { "path": "a:b" },
            "destination": { "path": "c:d", "svm": { "uuid": "s", "name": "c" } },
            "state": "broken_off"
        }))
        .unwrap();

        let rel = ReplicationRelationship::try_from(record).unwrap();
        assert_eq!(rel.state, RelationshipState::BrokenOff);
        assert!(rel.transfer.is_none());
    }

    #[test]
    fn test_flexclone_requires_parent() {
        let record: VolumeRecord = serde_json::from_value(json!({
            "uuid": "v1",
            "name": "vol_clone",
            "svm": { "uuid": "s", "name": "svm" },
            "clone": { "is_flexclone": true }
        }))
        .unwrap();

        assert_matches!(Volume::try_from(record), Err(Error::Internal(_)));
    }

    #[test]
    fn test_decode_volume_record() {
        let record: VolumeRecord = serde_json::from_value(json!({
            "uuid": "v1",
            "name": "vol_clone",
            "svm": { "uuid": "s", "name": "svm" },
            "clone": {
                "is_flexclone": true,
                "parent_volume": { "uuid": "p", "name": "vol_secondary" }
            },
            "nas": { "path": "/vol_clone", "security_style": "unix", "unix_permissions": 755 },
            "size": 1073741824u64,
            "aggregates": [{ "name": "aggr1" }]
        }))
        .unwrap();

        let volume = Volume::try_from(record).unwrap();
        assert!(volume.is_flexclone());
        assert_eq!(volume.parent_volume_name(), Some("vol_secondary"));
        assert_eq!(volume.junction_path(), Some("/vol_clone"));
        assert_eq!(
            volume.nas.unwrap().unix_permissions.map(|p| p.bits()),
            Some(0o755)
        );
        assert_eq!(volume.aggregates, vec!["aggr1".to_string()]);
    }

    #[test]
    fn test_ordinary_volume_has_no_clone_descriptor() {
        let record: VolumeRecord = serde_json::from_value(json!({
            "uuid": "v2",
            "name": "vol_secondary",
            "clone": { "is_flexclone": false }
        }))
        .unwrap();

        let volume = Volume::try_from(record).unwrap();
        assert!(!volume.is_flexclone());
    }

    #[test]
    fn test_error_body_description() {
        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "error": { "message": "entry doesn't exist", "code": "4", "target": "uuid" }
        }))
        .unwrap();
        assert_eq!(
            envelope.error.describe(),
            "entry doesn't exist (code 4, target uuid)"
        );
    }
}
