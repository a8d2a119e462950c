//! Domain Ports - Core trait definitions for ONTAP administration
//!
//! These traits define the boundaries between the workflow/provisioning logic
//! and the storage cluster's management API. The REST client and the
//! simulated cluster implement them.
//!
//! Lookups return `Result<Option<T>>`: `Ok(Some(_))` is found, `Ok(None)` is
//! absent and `Err(_)` is a failed request.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// References
// =============================================================================

/// A `{name, uuid}` reference to another cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Build the `svm:volume` path used to address replication endpoints
pub fn replication_path(svm: &str, volume: &str) -> String {
    format!("{}:{}", svm, volume)
}

// =============================================================================
// Replication Types
// =============================================================================

/// Mirror state of a replication relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipState {
    Uninitialized,
    Snapmirrored,
    BrokenOff,
    Paused,
    /// Transient or unsupported states (`in_sync`, `out_of_sync`, ...)
    Unknown(String),
}

impl RelationshipState {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipState::Uninitialized => "uninitialized",
            RelationshipState::Snapmirrored => "snapmirrored",
            RelationshipState::BrokenOff => "broken_off",
            RelationshipState::Paused => "paused",
            RelationshipState::Unknown(other) => other,
        }
    }
}

impl From<String> for RelationshipState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "uninitialized" => RelationshipState::Uninitialized,
            "snapmirrored" => RelationshipState::Snapmirrored,
            "broken_off" => RelationshipState::BrokenOff,
            "paused" => RelationshipState::Paused,
            _ => RelationshipState::Unknown(value),
        }
    }
}

impl From<RelationshipState> for String {
    fn from(value: RelationshipState) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for RelationshipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of the transfer currently attached to a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransferState {
    Idle,
    Transferring,
    Success,
    Failed,
    Unknown(String),
}

impl TransferState {
    pub fn as_str(&self) -> &str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Transferring => "transferring",
            TransferState::Success => "success",
            TransferState::Failed => "failed",
            TransferState::Unknown(other) => other,
        }
    }
}

impl From<String> for TransferState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "idle" => TransferState::Idle,
            "transferring" => TransferState::Transferring,
            "success" => TransferState::Success,
            "failed" => TransferState::Failed,
            _ => TransferState::Unknown(value),
        }
    }
}

impl From<TransferState> for String {
    fn from(value: TransferState) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Active transfer details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub state: TransferState,
    /// Bytes moved so far, when reported
    pub bytes_transferred: Option<u64>,
}

/// An asynchronous mirror between a source and a destination volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRelationship {
    /// Relationship UUID
    pub id: String,
    /// `svm:volume` of the source endpoint
    pub source_path: String,
    /// `svm:volume` of the destination endpoint
    pub destination_path: String,
    /// SVM owning the destination volume
    pub destination_svm: ResourceRef,
    pub state: RelationshipState,
    /// Present only while the cluster reports a transfer
    pub transfer: Option<Transfer>,
    pub healthy: Option<bool>,
}

impl ReplicationRelationship {
    /// Whether a transfer is currently moving data
    pub fn is_transferring(&self) -> bool {
        matches!(
            self.transfer.as_ref().map(|t| &t.state),
            Some(TransferState::Transferring)
        )
    }

    pub fn transfer_state(&self) -> Option<&TransferState> {
        self.transfer.as_ref().map(|t| &t.state)
    }

    /// Volume name part of the destination path
    pub fn destination_volume(&self) -> &str {
        self.destination_path
            .split_once(':')
            .map(|(_, volume)| volume)
            .unwrap_or(&self.destination_path)
    }
}

// =============================================================================
// Volume Types
// =============================================================================

/// NAS security style of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityStyle {
    Unix,
    Ntfs,
    Mixed,
}

impl std::fmt::Display for SecurityStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityStyle::Unix => write!(f, "unix"),
            SecurityStyle::Ntfs => write!(f, "ntfs"),
            SecurityStyle::Mixed => write!(f, "mixed"),
        }
    }
}

impl FromStr for SecurityStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "unix" => Ok(SecurityStyle::Unix),
            "ntfs" => Ok(SecurityStyle::Ntfs),
            "mixed" => Ok(SecurityStyle::Mixed),
            other => Err(Error::Validation(format!(
                "Unknown security style '{}', expected unix, ntfs or mixed",
                other
            ))),
        }
    }
}

/// UNIX permission bits of a volume root
///
/// Accepts octal (`755`, `0755`) or symbolic (`rwxr-xr-x`, `---rwxrwx---`)
/// notation. ONTAP transports the octal digits as a decimal integer, so
/// `0o755` travels as `755`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct UnixPermissions(u16);

impl UnixPermissions {
    /// `rwxr-xr-x`
    pub const DEFAULT: UnixPermissions = UnixPermissions(0o755);

    /// Permission bits, at most `0o7777`
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Value as ONTAP expects it on the wire
    pub fn wire_value(&self) -> u32 {
        format!("{:o}", self.0).parse().unwrap_or(0)
    }

    pub fn from_bits(bits: u16) -> Result<Self> {
        if bits > 0o7777 {
            return Err(Error::Validation(format!(
                "UNIX permissions {:o} exceed 7777",
                bits
            )));
        }
        Ok(Self(bits))
    }

    fn parse_symbolic(s: &str) -> Result<u16> {
        // 12 characters carry the setuid/setgid/sticky triplet in front
        let (special, rest) = match s.len() {
            9 if s.is_ascii() => ("---", s),
            12 if s.is_ascii() => s.split_at(3),
            _ => {
                return Err(Error::Validation(format!(
                    "Symbolic UNIX permissions must be 9 or 12 characters: '{}'",
                    s
                )))
            }
        };

        let mut bits = 0u16;
        for (i, c) in special.chars().enumerate() {
            match (c, i) {
                ('-', _) => {}
                ('s', 0) | ('u', 0) => bits |= 0o4000,
                ('s', 1) | ('g', 1) => bits |= 0o2000,
                ('t', 2) => bits |= 0o1000,
                _ => {
                    return Err(Error::Validation(format!(
                        "Invalid special permission flag '{}' in '{}'",
                        c, s
                    )))
                }
            }
        }

        for (i, c) in rest.chars().enumerate() {
            let expected = ['r', 'w', 'x'][i % 3];
            if c == expected {
                bits |= 1 << (8 - i);
            } else if c != '-' {
                return Err(Error::Validation(format!(
                    "Invalid permission character '{}' in '{}'",
                    c, s
                )));
            }
        }

        Ok(bits)
    }
}

impl FromStr for UnixPermissions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
            let bits = u16::from_str_radix(s, 8).map_err(|_| {
                Error::Validation(format!("Invalid octal UNIX permissions: '{}'", s))
            })?;
            return Self::from_bits(bits);
        }
        Self::from_bits(Self::parse_symbolic(s)?)
    }
}

impl TryFrom<u32> for UnixPermissions {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        value.to_string().parse()
    }
}

impl From<UnixPermissions> for u32 {
    fn from(value: UnixPermissions) -> Self {
        value.wire_value()
    }
}

impl std::fmt::Display for UnixPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

/// NAS settings of a volume; every field is optional so the same type
/// serves as a partial update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasSettings {
    /// Junction path
    pub path: Option<String>,
    pub security_style: Option<SecurityStyle>,
    pub unix_permissions: Option<UnixPermissions>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub export_policy: Option<String>,
}

impl NasSettings {
    pub fn is_empty(&self) -> bool {
        self == &NasSettings::default()
    }
}

/// Clone descriptor; its presence means the volume is a FlexClone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneInfo {
    pub parent_volume: ResourceRef,
    pub parent_svm: Option<ResourceRef>,
}

/// A storage volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub svm: ResourceRef,
    pub clone: Option<CloneInfo>,
    pub nas: Option<NasSettings>,
    pub size_bytes: Option<u64>,
    pub state: Option<String>,
    pub snapshot_policy: Option<String>,
    pub aggregates: Vec<String>,
}

impl Volume {
    pub fn is_flexclone(&self) -> bool {
        self.clone.is_some()
    }

    pub fn parent_volume_name(&self) -> Option<&str> {
        self.clone.as_ref().map(|c| c.parent_volume.name.as_str())
    }

    pub fn junction_path(&self) -> Option<&str> {
        self.nas.as_ref().and_then(|n| n.path.as_deref())
    }
}

/// Filter for volume collection queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeFilter {
    pub svm_name: Option<String>,
    pub name: Option<String>,
    pub is_flexclone: Option<bool>,
    pub parent_volume_name: Option<String>,
}

impl VolumeFilter {
    /// All volumes of an SVM
    pub fn in_svm(svm_name: impl Into<String>) -> Self {
        Self {
            svm_name: Some(svm_name.into()),
            ..Default::default()
        }
    }

    /// FlexClones whose parent volume carries the given name
    pub fn clones_of(parent_volume_name: impl Into<String>) -> Self {
        Self {
            is_flexclone: Some(true),
            parent_volume_name: Some(parent_volume_name.into()),
            ..Default::default()
        }
    }

    pub fn with_svm(mut self, svm_name: impl Into<String>) -> Self {
        self.svm_name = Some(svm_name.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, volume: &Volume) -> bool {
        self.svm_name.as_ref().map_or(true, |s| &volume.svm.name == s)
            && self.name.as_ref().map_or(true, |n| &volume.name == n)
            && self
                .is_flexclone
                .map_or(true, |flag| volume.is_flexclone() == flag)
            && self
                .parent_volume_name
                .as_deref()
                .map_or(true, |p| volume.parent_volume_name() == Some(p))
    }
}

/// Request to create a FlexClone of a parent volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRequest {
    /// SVM owning the parent; the clone is created in the same SVM
    pub parent_svm: ResourceRef,
    pub parent_volume: ResourceRef,
    pub clone_name: String,
    pub junction_path: Option<String>,
}

/// Request to create an ordinary NAS volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub svm_name: String,
    pub name: String,
    pub aggregate: String,
    pub size_bytes: u64,
    pub nas: NasSettings,
    pub snapshot_policy: String,
}

// =============================================================================
// Directory Service Types
// =============================================================================

/// Storage virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Svm {
    pub id: String,
    pub name: String,
    pub cifs: Option<CifsStatus>,
}

impl Svm {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.id, &self.name)
    }
}

/// CIFS availability of an SVM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CifsStatus {
    pub allowed: bool,
    pub enabled: bool,
    pub ad_domain: Option<String>,
}

/// NFS protocol settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsSettings {
    pub v3_enabled: bool,
    pub v4_enabled: bool,
    pub v4_id_domain: Option<String>,
}

/// LDAP client configuration of an SVM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapConfig {
    pub base_dn: String,
    pub ad_domain: Option<String>,
    pub bind_dn: Option<String>,
    pub schema: String,
    pub port: u16,
    pub enabled: bool,
}

/// Name-service switch sources per database
pub type NsSwitch = BTreeMap<String, Vec<String>>;

/// Direction of a name mapping rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    WinUnix,
    UnixWin,
}

impl MappingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingDirection::WinUnix => "win_unix",
            MappingDirection::UnixWin => "unix_win",
        }
    }
}

/// A name mapping rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMapping {
    pub direction: MappingDirection,
    pub index: u32,
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixUser {
    pub name: String,
    pub id: u32,
    pub primary_gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixGroup {
    pub name: String,
    pub id: u32,
}

/// A CIFS share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CifsShare {
    pub name: String,
    pub path: String,
    pub properties: Vec<String>,
}

/// Share-level permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    NoAccess,
    Read,
    Change,
    FullControl,
}

/// Share access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareAcl {
    pub user_or_group: String,
    pub permission: SharePermission,
    /// `windows` or `unix_user`/`unix_group`
    pub acl_type: String,
}

impl ShareAcl {
    pub fn windows(user_or_group: impl Into<String>, permission: SharePermission) -> Self {
        Self {
            user_or_group: user_or_group.into(),
            permission,
            acl_type: "windows".to_string(),
        }
    }
}

// =============================================================================
// Object Storage Types
// =============================================================================

/// Server certificate installed on an SVM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub name: Option<String>,
    pub common_name: String,
    pub serial_number: Option<String>,
}

/// S3 bucket backed by a NAS path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: Option<String>,
    pub name: String,
    pub nas_path: Option<String>,
    pub volume: Option<ResourceRef>,
    pub bucket_type: Option<String>,
    pub comment: Option<String>,
}

/// S3 object server of an SVM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectServer {
    pub name: String,
    pub svm: ResourceRef,
    pub enabled: bool,
    pub http_enabled: bool,
    pub https_enabled: bool,
    pub port: u16,
    pub secure_port: u16,
    pub certificate: Option<ResourceRef>,
    pub buckets: Vec<Bucket>,
}

/// Request to create an S3 object server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectServerRequest {
    pub svm_id: String,
    pub name: String,
    pub certificate_id: String,
    pub port: u16,
    pub secure_port: u16,
}

/// Request to create a NAS bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRequest {
    pub svm_id: String,
    pub name: String,
    pub nas_path: String,
    pub comment: String,
}

// =============================================================================
// Replication Port
// =============================================================================

/// Port for replication relationship operations
#[async_trait]
pub trait ReplicationPort: Send + Sync {
    /// Find the relationship whose destination is `svm:volume`
    async fn find_relationship(
        &self,
        destination_path: &str,
    ) -> Result<Option<ReplicationRelationship>>;

    /// Re-read a relationship by id
    async fn get_relationship(&self, id: &str) -> Result<Option<ReplicationRelationship>>;

    /// Request a state transition and wait for the cluster to complete it
    async fn update_relationship_state(
        &self,
        id: &str,
        state: RelationshipState,
    ) -> Result<ReplicationRelationship>;
}

// =============================================================================
// Volume Port
// =============================================================================

/// Port for volume operations
#[async_trait]
pub trait VolumePort: Send + Sync {
    async fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>>;

    async fn find_volume(&self, svm_name: &str, name: &str) -> Result<Option<Volume>>;

    async fn delete_volume(&self, id: &str, force: bool) -> Result<()>;

    /// Create a FlexClone and return the new volume
    async fn create_clone(&self, request: &CloneRequest) -> Result<Volume>;

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<Volume>;

    /// Patch the NAS settings that are `Some` in `update`
    async fn update_volume_nas(&self, id: &str, update: &NasSettings) -> Result<()>;
}

// =============================================================================
// NAS Services Port
// =============================================================================

/// Port for NAS protocol and name-service configuration
#[async_trait]
pub trait NasServicesPort: Send + Sync {
    async fn find_svm(&self, name: &str) -> Result<Option<Svm>>;

    async fn update_nsswitch(&self, svm: &ResourceRef, nsswitch: &NsSwitch) -> Result<()>;

    async fn get_nfs_service(&self, svm: &ResourceRef) -> Result<Option<NfsSettings>>;

    async fn update_nfs_service(&self, svm: &ResourceRef, settings: &NfsSettings) -> Result<()>;

    async fn get_ldap(&self, svm: &ResourceRef) -> Result<Option<LdapConfig>>;

    async fn create_ldap(&self, svm: &ResourceRef, config: &LdapConfig) -> Result<()>;

    async fn update_ldap(&self, svm: &ResourceRef, config: &LdapConfig) -> Result<()>;

    async fn list_name_mappings(
        &self,
        svm: &ResourceRef,
        direction: Option<MappingDirection>,
    ) -> Result<Vec<NameMapping>>;

    async fn create_name_mapping(&self, svm: &ResourceRef, mapping: &NameMapping) -> Result<()>;

    async fn find_unix_user(&self, svm: &ResourceRef, name: &str) -> Result<Option<UnixUser>>;

    async fn create_unix_user(&self, svm: &ResourceRef, user: &UnixUser) -> Result<()>;

    async fn find_unix_group(&self, svm: &ResourceRef, name: &str) -> Result<Option<UnixGroup>>;

    async fn create_unix_group(&self, svm: &ResourceRef, group: &UnixGroup) -> Result<()>;

    async fn find_cifs_share(&self, svm: &ResourceRef, name: &str) -> Result<Option<CifsShare>>;

    async fn create_cifs_share(&self, svm: &ResourceRef, share: &CifsShare) -> Result<()>;

    async fn find_share_acl(
        &self,
        svm: &ResourceRef,
        share: &str,
        user_or_group: &str,
    ) -> Result<Option<ShareAcl>>;

    async fn create_share_acl(&self, svm: &ResourceRef, share: &str, acl: &ShareAcl)
        -> Result<()>;

    async fn delete_share_acl(&self, svm: &ResourceRef, share: &str, acl: &ShareAcl)
        -> Result<()>;
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Port for S3 endpoint provisioning
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn list_svms(&self) -> Result<Vec<Svm>>;

    async fn list_certificates(&self, svm_id: &str) -> Result<Vec<Certificate>>;

    async fn create_certificate(&self, svm_id: &str, common_name: &str) -> Result<Certificate>;

    async fn list_object_servers(&self) -> Result<Vec<ObjectServer>>;

    async fn create_object_server(&self, request: &ObjectServerRequest) -> Result<ObjectServer>;

    async fn create_bucket(&self, request: &BucketRequest) -> Result<Bucket>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ReplicationPortRef = Arc<dyn ReplicationPort>;
pub type VolumePortRef = Arc<dyn VolumePort>;
pub type NasServicesPortRef = Arc<dyn NasServicesPort>;
pub type ObjectStorePortRef = Arc<dyn ObjectStorePort>;
