//! Simulated Cluster
//!
//! In-memory implementation of every port. Used by the test-suite and by
//! `--simulate` runs of the CLI. Behaviour can be scripted (transfers that
//! stay busy for a number of reads, deletions or operations that fail) and
//! every call is recorded so callers can assert on the exact sequence.

use crate::domain::ports::{
    Bucket, BucketRequest, Certificate, CifsShare, CifsStatus, CloneInfo, CloneRequest,
    LdapConfig, MappingDirection, NameMapping, NasServicesPort, NasSettings, NfsSettings,
    NsSwitch, ObjectServer, ObjectServerRequest, ObjectStorePort, RelationshipState,
    ReplicationPort, ReplicationRelationship, ResourceRef, ShareAcl, Svm, Transfer,
    TransferState, UnixGroup, UnixUser, Volume, VolumeFilter, VolumePort, VolumeSpec,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// =============================================================================
// Recorded Calls
// =============================================================================

/// One port call as seen by the simulated cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub target: String,
}

// =============================================================================
// Cluster State
// =============================================================================

#[derive(Debug, Default)]
struct ClusterState {
    next_id: u64,
    relationships: BTreeMap<String, ReplicationRelationship>,
    /// Reads left before a relationship's transfer finishes
    pending_transfers: BTreeMap<String, u32>,
    volumes: BTreeMap<String, Volume>,
    svms: BTreeMap<String, Svm>,
    nsswitch: BTreeMap<String, NsSwitch>,
    nfs: BTreeMap<String, NfsSettings>,
    ldap: BTreeMap<String, LdapConfig>,
    name_mappings: BTreeMap<String, Vec<NameMapping>>,
    unix_users: BTreeMap<(String, String), UnixUser>,
    unix_groups: BTreeMap<(String, String), UnixGroup>,
    shares: BTreeMap<(String, String), CifsShare>,
    share_acls: BTreeMap<(String, String), Vec<ShareAcl>>,
    certificates: BTreeMap<String, Vec<Certificate>>,
    object_servers: BTreeMap<String, ObjectServer>,
}

impl ClusterState {
    fn generate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn svm_by_name(&self, name: &str) -> Option<&Svm> {
        self.svms.values().find(|s| s.name == name)
    }

    fn ensure_svm(&mut self, name: &str) -> ResourceRef {
        if let Some(svm) = self.svm_by_name(name) {
            return svm.reference();
        }
        let svm = Svm {
            id: format!("svm-{}", name),
            name: name.to_string(),
            cifs: None,
        };
        let reference = svm.reference();
        self.svms.insert(svm.id.clone(), svm);
        reference
    }

    fn find_volume(&self, svm_name: &str, name: &str) -> Option<&Volume> {
        self.volumes
            .values()
            .find(|v| v.svm.name == svm_name && v.name == name)
    }

    fn insert_volume(
        &mut self,
        svm_name: &str,
        name: &str,
        clone: Option<CloneInfo>,
        nas: Option<NasSettings>,
    ) -> Volume {
        let svm = self.ensure_svm(svm_name);
        let volume = Volume {
            id: self.generate_id("vol"),
            name: name.to_string(),
            svm,
            clone,
            nas,
            size_bytes: None,
            state: Some("online".to_string()),
            snapshot_policy: None,
            aggregates: Vec::new(),
        };
        self.volumes.insert(volume.id.clone(), volume.clone());
        volume
    }
}

/// Scripted behaviour
#[derive(Debug, Clone)]
struct Script {
    /// Reads that report `transferring` after a resume
    resync_transfer_polls: u32,
    /// State a transfer settles in once it stops
    transfer_outcome: TransferState,
    /// Volume names whose deletion fails
    failing_deletes: BTreeSet<String>,
    /// Operations that fail whatever their target
    failing_operations: BTreeSet<&'static str>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            resync_transfer_polls: 1,
            transfer_outcome: TransferState::Success,
            failing_deletes: BTreeSet::new(),
            failing_operations: BTreeSet::new(),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Seeds a [`SimulatedCluster`]
#[derive(Debug, Default)]
pub struct SimulatedClusterBuilder {
    state: ClusterState,
    script: Script,
}

impl SimulatedClusterBuilder {
    pub fn svm(mut self, name: &str) -> Self {
        self.state.ensure_svm(name);
        self
    }

    /// SVM joined to an Active Directory domain with CIFS running
    pub fn cifs_svm(mut self, name: &str, ad_domain: &str) -> Self {
        let svm = self.state.ensure_svm(name);
        if let Some(entry) = self.state.svms.get_mut(&svm.id) {
            entry.cifs = Some(CifsStatus {
                allowed: true,
                enabled: true,
                ad_domain: Some(ad_domain.to_string()),
            });
        }
        self
    }

    /// Ordinary volume mounted at `/<name>`
    pub fn volume(mut self, svm: &str, name: &str) -> Self {
        let nas = NasSettings {
            path: Some(format!("/{}", name)),
            ..Default::default()
        };
        self.state.insert_volume(svm, name, None, Some(nas));
        self
    }

    /// Volume without a junction path
    pub fn unmounted_volume(mut self, svm: &str, name: &str) -> Self {
        self.state.insert_volume(svm, name, None, None);
        self
    }

    /// FlexClone of `parent`; the parent must already be seeded
    pub fn clone_of(mut self, svm: &str, parent: &str, name: &str) -> Self {
        let parent_ref = self
            .state
            .find_volume(svm, parent)
            .map(|v| ResourceRef::new(&v.id, &v.name))
            .unwrap_or_else(|| ResourceRef::new(format!("missing-{}", parent), parent));
        let clone = CloneInfo {
            parent_volume: parent_ref,
            parent_svm: None,
        };
        self.state.insert_volume(svm, name, Some(clone), None);
        self
    }

    /// Relationship whose destination is `svm:volume`
    pub fn relationship(
        mut self,
        id: &str,
        source_path: &str,
        destination_svm: &str,
        destination_volume: &str,
        state: RelationshipState,
    ) -> Self {
        let svm = self.state.ensure_svm(destination_svm);
        let relationship = ReplicationRelationship {
            id: id.to_string(),
            source_path: source_path.to_string(),
            destination_path: format!("{}:{}", destination_svm, destination_volume),
            destination_svm: svm,
            state,
            transfer: Some(Transfer {
                state: TransferState::Idle,
                bytes_transferred: None,
            }),
            healthy: Some(true),
        };
        self.state
            .relationships
            .insert(id.to_string(), relationship);
        self
    }

    /// Report `transferring` for the next `reads` relationship reads
    pub fn transferring_for(mut self, relationship_id: &str, reads: u32) -> Self {
        if let Some(rel) = self.state.relationships.get_mut(relationship_id) {
            rel.transfer = Some(Transfer {
                state: TransferState::Transferring,
                bytes_transferred: Some(0),
            });
        }
        self.state
            .pending_transfers
            .insert(relationship_id.to_string(), reads);
        self
    }

    /// Reads reporting `transferring` after each resume
    pub fn resync_transfer_polls(mut self, reads: u32) -> Self {
        self.script.resync_transfer_polls = reads;
        self
    }

    /// State transfers end in
    pub fn transfer_outcome(mut self, outcome: TransferState) -> Self {
        self.script.transfer_outcome = outcome;
        self
    }

    /// Deleting the named volume fails
    pub fn failing_delete(mut self, volume_name: &str) -> Self {
        self.script.failing_deletes.insert(volume_name.to_string());
        self
    }

    /// Every call of the named port operation fails
    pub fn failing_operation(mut self, operation: &'static str) -> Self {
        self.script.failing_operations.insert(operation);
        self
    }

    pub fn build(self) -> SimulatedCluster {
        SimulatedCluster {
            state: RwLock::new(self.state),
            script: self.script,
            calls: RwLock::new(Vec::new()),
        }
    }
}

// =============================================================================
// Simulated Cluster
// =============================================================================

/// In-memory cluster implementing all ports
pub struct SimulatedCluster {
    state: RwLock<ClusterState>,
    script: Script,
    calls: RwLock<Vec<RecordedCall>>,
}

impl SimulatedCluster {
    pub fn builder() -> SimulatedClusterBuilder {
        SimulatedClusterBuilder::default()
    }

    /// Small cluster used by `--simulate` runs
    pub fn demo() -> Self {
        Self::builder()
            .cifs_svm("fsx0svm1", "corp.example.com")
            .volume("fsx0svm1", "vol_secondary")
            .clone_of("fsx0svm1", "vol_secondary", "vol_secondary_clone")
            .relationship(
                "rel-demo",
                "fsx0svm0:vol_primary",
                "fsx0svm1",
                "vol_secondary",
                RelationshipState::Snapmirrored,
            )
            .transferring_for("rel-demo", 2)
            .build()
    }

    /// Calls received so far, in order
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Number of calls of one operation
    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Current state of a relationship, without recording a call
    pub async fn relationship_state(&self, id: &str) -> Option<RelationshipState> {
        self.state
            .read()
            .await
            .relationships
            .get(id)
            .map(|r| r.state.clone())
    }

    /// Names of all volumes of an SVM, without recording a call
    pub async fn volume_names(&self, svm_name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .volumes
            .values()
            .filter(|v| v.svm.name == svm_name)
            .map(|v| v.name.clone())
            .collect()
    }

    pub async fn share_acls(&self, svm_id: &str, share: &str) -> Vec<ShareAcl> {
        self.state
            .read()
            .await
            .share_acls
            .get(&(svm_id.to_string(), share.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Record a call and apply scripted operation failures
    async fn record(&self, operation: &'static str, target: impl Into<String>) -> Result<()> {
        let target = target.into();
        debug!("Simulated cluster: {} {}", operation, target);
        self.calls.write().await.push(RecordedCall {
            operation,
            target: target.clone(),
        });

        if self.script.failing_operations.contains(operation) {
            warn!("Simulated cluster failing {} {}", operation, target);
            return Err(rejected(operation, &target, "scripted failure"));
        }
        Ok(())
    }
}

fn rejected(operation: &str, target: &str, cause: &str) -> Error {
    Error::RequestFailed {
        operation: format!("{} {}", operation, target),
        status: Some(400),
        cause: cause.to_string(),
    }
}

// =============================================================================
// Replication
// =============================================================================

#[async_trait]
impl ReplicationPort for SimulatedCluster {
    async fn find_relationship(
        &self,
        destination_path: &str,
    ) -> Result<Option<ReplicationRelationship>> {
        self.record("find_relationship", destination_path).await?;

        let state = self.state.read().await;
        Ok(state
            .relationships
            .values()
            .find(|r| r.destination_path == destination_path)
            .cloned())
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<ReplicationRelationship>> {
        self.record("get_relationship", id).await?;

        let mut state = self.state.write().await;
        let busy = match state.pending_transfers.get(id).copied() {
            Some(remaining) if remaining > 0 => {
                state
                    .pending_transfers
                    .insert(id.to_string(), remaining - 1);
                true
            }
            Some(_) => {
                state.pending_transfers.remove(id);
                false
            }
            None => return Ok(state.relationships.get(id).cloned()),
        };

        let outcome = self.script.transfer_outcome.clone();
        Ok(state.relationships.get_mut(id).map(|rel| {
            if !busy {
                rel.transfer = Some(Transfer {
                    state: outcome,
                    bytes_transferred: rel.transfer.as_ref().and_then(|t| t.bytes_transferred),
                });
            }
            rel.clone()
        }))
    }

    async fn update_relationship_state(
        &self,
        id: &str,
        new_state: RelationshipState,
    ) -> Result<ReplicationRelationship> {
        self.record("update_relationship_state", format!("{} -> {}", id, new_state))
            .await?;

        let mut state = self.state.write().await;
        let resync_polls = self.script.resync_transfer_polls;
        let rel = state
            .relationships
            .get_mut(id)
            .ok_or_else(|| Error::not_found("SnapmirrorRelationship", id))?;

        let resuming =
            rel.state == RelationshipState::BrokenOff && new_state == RelationshipState::Snapmirrored;
        info!("Simulated relationship {}: {} -> {}", id, rel.state, new_state);
        rel.state = new_state;
        if resuming {
            rel.transfer = Some(Transfer {
                state: TransferState::Transferring,
                bytes_transferred: Some(0),
            });
        }
        let updated = rel.clone();

        if resuming {
            state.pending_transfers.insert(id.to_string(), resync_polls);
        }
        Ok(updated)
    }
}

// =============================================================================
// Volumes
// =============================================================================

#[async_trait]
impl VolumePort for SimulatedCluster {
    async fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>> {
        let target = filter
            .parent_volume_name
            .as_deref()
            .or(filter.svm_name.as_deref())
            .unwrap_or("*")
            .to_string();
        self.record("list_volumes", target).await?;

        let state = self.state.read().await;
        Ok(state
            .volumes
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect())
    }

    async fn find_volume(&self, svm_name: &str, name: &str) -> Result<Option<Volume>> {
        self.record("find_volume", format!("{}:{}", svm_name, name))
            .await?;
        Ok(self.state.read().await.find_volume(svm_name, name).cloned())
    }

    async fn delete_volume(&self, id: &str, force: bool) -> Result<()> {
        self.record("delete_volume", id).await?;

        let mut state = self.state.write().await;
        let name = state
            .volumes
            .get(id)
            .map(|v| v.name.clone())
            .ok_or_else(|| Error::not_found("Volume", id))?;

        if self.script.failing_deletes.contains(&name) {
            return Err(rejected("delete_volume", &name, "volume is busy"));
        }
        if !force && state.volumes.get(id).and_then(|v| v.junction_path()).is_some() {
            return Err(rejected(
                "delete_volume",
                &name,
                "volume is mounted; unmount it or delete with force",
            ));
        }

        state.volumes.remove(id);
        Ok(())
    }

    async fn create_clone(&self, request: &CloneRequest) -> Result<Volume> {
        self.record("create_clone", &request.clone_name).await?;

        let mut state = self.state.write().await;
        if state
            .find_volume(&request.parent_svm.name, &request.clone_name)
            .is_some()
        {
            return Err(rejected(
                "create_clone",
                &request.clone_name,
                "duplicate volume name",
            ));
        }
        if !state.volumes.contains_key(&request.parent_volume.id) {
            return Err(Error::not_found("Volume", &request.parent_volume.name));
        }

        let clone = CloneInfo {
            parent_volume: request.parent_volume.clone(),
            parent_svm: Some(request.parent_svm.clone()),
        };
        let nas = request.junction_path.as_ref().map(|path| NasSettings {
            path: Some(path.clone()),
            ..Default::default()
        });
        Ok(state.insert_volume(&request.parent_svm.name, &request.clone_name, Some(clone), nas))
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<Volume> {
        self.record("create_volume", &spec.name).await?;

        let mut state = self.state.write().await;
        if state.svm_by_name(&spec.svm_name).is_none() {
            return Err(Error::not_found("Svm", &spec.svm_name));
        }
        if state.find_volume(&spec.svm_name, &spec.name).is_some() {
            return Err(rejected("create_volume", &spec.name, "duplicate volume name"));
        }

        let mut volume = state.insert_volume(&spec.svm_name, &spec.name, None, Some(spec.nas.clone()));
        volume.size_bytes = Some(spec.size_bytes);
        volume.snapshot_policy = Some(spec.snapshot_policy.clone());
        volume.aggregates = vec![spec.aggregate.clone()];
        state.volumes.insert(volume.id.clone(), volume.clone());
        Ok(volume)
    }

    async fn update_volume_nas(&self, id: &str, update: &NasSettings) -> Result<()> {
        self.record("update_volume_nas", id).await?;

        let mut state = self.state.write().await;
        let volume = state
            .volumes
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Volume", id))?;
        let nas = volume.nas.get_or_insert_with(NasSettings::default);

        if update.path.is_some() {
            nas.path = update.path.clone();
        }
        if update.security_style.is_some() {
            nas.security_style = update.security_style;
        }
        if update.unix_permissions.is_some() {
            nas.unix_permissions = update.unix_permissions;
        }
        if update.uid.is_some() {
            nas.uid = update.uid;
        }
        if update.gid.is_some() {
            nas.gid = update.gid;
        }
        if update.export_policy.is_some() {
            nas.export_policy = update.export_policy.clone();
        }
        Ok(())
    }
}

// =============================================================================
// NAS services
// =============================================================================

#[async_trait]
impl NasServicesPort for SimulatedCluster {
    async fn find_svm(&self, name: &str) -> Result<Option<Svm>> {
        self.record("find_svm", name).await?;
        Ok(self.state.read().await.svm_by_name(name).cloned())
    }

    async fn update_nsswitch(&self, svm: &ResourceRef, nsswitch: &NsSwitch) -> Result<()> {
        self.record("update_nsswitch", &svm.name).await?;
        self.state
            .write()
            .await
            .nsswitch
            .insert(svm.id.clone(), nsswitch.clone());
        Ok(())
    }

    async fn get_nfs_service(&self, svm: &ResourceRef) -> Result<Option<NfsSettings>> {
        self.record("get_nfs_service", &svm.name).await?;
        Ok(self.state.read().await.nfs.get(&svm.id).cloned())
    }

    async fn update_nfs_service(&self, svm: &ResourceRef, settings: &NfsSettings) -> Result<()> {
        self.record("update_nfs_service", &svm.name).await?;
        self.state
            .write()
            .await
            .nfs
            .insert(svm.id.clone(), settings.clone());
        Ok(())
    }

    async fn get_ldap(&self, svm: &ResourceRef) -> Result<Option<LdapConfig>> {
        self.record("get_ldap", &svm.name).await?;
        Ok(self.state.read().await.ldap.get(&svm.id).cloned())
    }

    async fn create_ldap(&self, svm: &ResourceRef, config: &LdapConfig) -> Result<()> {
        self.record("create_ldap", &svm.name).await?;
        let mut state = self.state.write().await;
        if state.ldap.contains_key(&svm.id) {
            return Err(rejected("create_ldap", &svm.name, "LDAP client already exists"));
        }
        state.ldap.insert(svm.id.clone(), config.clone());
        Ok(())
    }

    async fn update_ldap(&self, svm: &ResourceRef, config: &LdapConfig) -> Result<()> {
        self.record("update_ldap", &svm.name).await?;
        let mut state = self.state.write().await;
        match state.ldap.get_mut(&svm.id) {
            Some(existing) => {
                *existing = config.clone();
                Ok(())
            }
            None => Err(Error::not_found("LdapConfig", &svm.name)),
        }
    }

    async fn list_name_mappings(
        &self,
        svm: &ResourceRef,
        direction: Option<MappingDirection>,
    ) -> Result<Vec<NameMapping>> {
        self.record("list_name_mappings", &svm.name).await?;
        let state = self.state.read().await;
        Ok(state
            .name_mappings
            .get(&svm.id)
            .map(|mappings| {
                mappings
                    .iter()
                    .filter(|m| direction.map_or(true, |d| m.direction == d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_name_mapping(&self, svm: &ResourceRef, mapping: &NameMapping) -> Result<()> {
        self.record("create_name_mapping", &mapping.pattern).await?;
        let mut state = self.state.write().await;
        let mappings = state.name_mappings.entry(svm.id.clone()).or_default();
        if mappings
            .iter()
            .any(|m| m.direction == mapping.direction && m.index == mapping.index)
        {
            return Err(rejected(
                "create_name_mapping",
                &mapping.pattern,
                "a mapping already exists at that position",
            ));
        }
        mappings.push(mapping.clone());
        Ok(())
    }

    async fn find_unix_user(&self, svm: &ResourceRef, name: &str) -> Result<Option<UnixUser>> {
        self.record("find_unix_user", name).await?;
        Ok(self
            .state
            .read()
            .await
            .unix_users
            .get(&(svm.id.clone(), name.to_string()))
            .cloned())
    }

    async fn create_unix_user(&self, svm: &ResourceRef, user: &UnixUser) -> Result<()> {
        self.record("create_unix_user", &user.name).await?;
        self.state
            .write()
            .await
            .unix_users
            .insert((svm.id.clone(), user.name.clone()), user.clone());
        Ok(())
    }

    async fn find_unix_group(&self, svm: &ResourceRef, name: &str) -> Result<Option<UnixGroup>> {
        self.record("find_unix_group", name).await?;
        Ok(self
            .state
            .read()
            .await
            .unix_groups
            .get(&(svm.id.clone(), name.to_string()))
            .cloned())
    }

    async fn create_unix_group(&self, svm: &ResourceRef, group: &UnixGroup) -> Result<()> {
        self.record("create_unix_group", &group.name).await?;
        self.state
            .write()
            .await
            .unix_groups
            .insert((svm.id.clone(), group.name.clone()), group.clone());
        Ok(())
    }

    async fn find_cifs_share(&self, svm: &ResourceRef, name: &str) -> Result<Option<CifsShare>> {
        self.record("find_cifs_share", name).await?;
        Ok(self
            .state
            .read()
            .await
            .shares
            .get(&(svm.id.clone(), name.to_string()))
            .cloned())
    }

    async fn create_cifs_share(&self, svm: &ResourceRef, share: &CifsShare) -> Result<()> {
        self.record("create_cifs_share", &share.name).await?;
        let mut state = self.state.write().await;
        let key = (svm.id.clone(), share.name.clone());
        state.shares.insert(key.clone(), share.clone());
        // New shares grant Everyone full control, as ONTAP does
        state.share_acls.insert(
            key,
            vec![ShareAcl::windows(
                "Everyone",
                crate::domain::ports::SharePermission::FullControl,
            )],
        );
        Ok(())
    }

    async fn find_share_acl(
        &self,
        svm: &ResourceRef,
        share: &str,
        user_or_group: &str,
    ) -> Result<Option<ShareAcl>> {
        self.record("find_share_acl", format!("{}/{}", share, user_or_group))
            .await?;
        let state = self.state.read().await;
        Ok(state
            .share_acls
            .get(&(svm.id.clone(), share.to_string()))
            .and_then(|acls| acls.iter().find(|a| a.user_or_group == user_or_group))
            .cloned())
    }

    async fn create_share_acl(&self, svm: &ResourceRef, share: &str, acl: &ShareAcl) -> Result<()> {
        self.record("create_share_acl", format!("{}/{}", share, acl.user_or_group))
            .await?;
        let mut state = self.state.write().await;
        let key = (svm.id.clone(), share.to_string());
        if !state.shares.contains_key(&key) {
            return Err(Error::not_found("CifsShare", share));
        }
        let acls = state.share_acls.entry(key).or_default();
        acls.retain(|a| a.user_or_group != acl.user_or_group);
        acls.push(acl.clone());
        Ok(())
    }

    async fn delete_share_acl(&self, svm: &ResourceRef, share: &str, acl: &ShareAcl) -> Result<()> {
        self.record("delete_share_acl", format!("{}/{}", share, acl.user_or_group))
            .await?;
        let mut state = self.state.write().await;
        if let Some(acls) = state
            .share_acls
            .get_mut(&(svm.id.clone(), share.to_string()))
        {
            acls.retain(|a| a.user_or_group != acl.user_or_group);
        }
        Ok(())
    }
}

// =============================================================================
// Object storage
// =============================================================================

#[async_trait]
impl ObjectStorePort for SimulatedCluster {
    async fn list_svms(&self) -> Result<Vec<Svm>> {
        self.record("list_svms", "*").await?;
        Ok(self.state.read().await.svms.values().cloned().collect())
    }

    async fn list_certificates(&self, svm_id: &str) -> Result<Vec<Certificate>> {
        self.record("list_certificates", svm_id).await?;
        Ok(self
            .state
            .read()
            .await
            .certificates
            .get(svm_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_certificate(&self, svm_id: &str, common_name: &str) -> Result<Certificate> {
        self.record("create_certificate", common_name).await?;
        let mut state = self.state.write().await;
        let id = state.generate_id("cert");
        let certificate = Certificate {
            name: Some(format!("{}_{}", common_name, id)),
            id,
            common_name: common_name.to_string(),
            serial_number: None,
        };
        state
            .certificates
            .entry(svm_id.to_string())
            .or_default()
            .push(certificate.clone());
        Ok(certificate)
    }

    async fn list_object_servers(&self) -> Result<Vec<ObjectServer>> {
        self.record("list_object_servers", "*").await?;
        Ok(self
            .state
            .read()
            .await
            .object_servers
            .values()
            .cloned()
            .collect())
    }

    async fn create_object_server(&self, request: &ObjectServerRequest) -> Result<ObjectServer> {
        self.record("create_object_server", &request.name).await?;
        let mut state = self.state.write().await;
        let svm = state
            .svms
            .get(&request.svm_id)
            .map(Svm::reference)
            .ok_or_else(|| Error::not_found("Svm", &request.svm_id))?;
        if state.object_servers.contains_key(&request.svm_id) {
            return Err(rejected(
                "create_object_server",
                &request.name,
                "SVM already has an object store server",
            ));
        }

        let certificate = state
            .certificates
            .get(&request.svm_id)
            .and_then(|certs| certs.iter().find(|c| c.id == request.certificate_id))
            .map(|c| ResourceRef::new(&c.id, c.name.clone().unwrap_or_default()));
        let server = ObjectServer {
            name: request.name.clone(),
            svm,
            enabled: true,
            http_enabled: true,
            https_enabled: true,
            port: request.port,
            secure_port: request.secure_port,
            certificate,
            buckets: Vec::new(),
        };
        state
            .object_servers
            .insert(request.svm_id.clone(), server.clone());
        Ok(server)
    }

    async fn create_bucket(&self, request: &BucketRequest) -> Result<Bucket> {
        self.record("create_bucket", &request.name).await?;
        let mut state = self.state.write().await;
        let volume = state
            .volumes
            .values()
            .find(|v| v.svm.id == request.svm_id && v.junction_path() == Some(request.nas_path.as_str()))
            .map(|v| ResourceRef::new(&v.id, &v.name));
        let id = state.generate_id("bucket");

        let server = state
            .object_servers
            .get_mut(&request.svm_id)
            .ok_or_else(|| Error::not_found("S3Service", &request.svm_id))?;
        if server.buckets.iter().any(|b| b.name == request.name) {
            return Err(rejected("create_bucket", &request.name, "bucket already exists"));
        }

        let bucket = Bucket {
            id: Some(id),
            name: request.name.clone(),
            nas_path: Some(request.nas_path.clone()),
            volume,
            bucket_type: Some("nas".to_string()),
            comment: Some(request.comment.clone()),
        };
        server.buckets.push(bucket.clone());
        Ok(bucket)
    }
}
