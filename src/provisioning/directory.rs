//! Directory service integration
//!
//! Joins an SVM's NAS protocols to an Active Directory domain through LDAP
//! (RFC 2307 attributes via the `AD-IDMU` schema). The configuration runs as
//! a fixed sequence of idempotent steps; a failing step is recorded and the
//! remaining steps still run.

use crate::domain::ports::{
    CifsShare, LdapConfig, MappingDirection, NameMapping, NasServicesPortRef, NfsSettings,
    NsSwitch, ResourceRef, ShareAcl, SharePermission, UnixGroup, UnixUser,
};
use crate::error::{Error, Result};
use crate::provisioning::ApplyOutcome;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

const EVERYONE: &str = "Everyone";
const ADMINISTRATORS: &str = "BUILTIN\\Administrators";

// =============================================================================
// Configuration
// =============================================================================

/// UNIX user created on the SVM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixUserConfig {
    pub name: String,
    pub id: u32,
    pub primary_gid: u32,
}

/// UNIX group created on the SVM and mapped from the AD group of the same name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixGroupConfig {
    pub name: String,
    pub id: u32,
}

/// Directory integration settings of one SVM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub svm: String,
    /// AD domain; also the NFSv4 id domain and the mapping prefix
    pub domain: String,
    pub base_dn: String,
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default = "default_schema")]
    pub ldap_schema: String,
    #[serde(default = "default_ldap_port")]
    pub ldap_port: u16,
    pub share_name: String,
    /// Junction path exported by the share
    pub share_path: String,
    pub unix_user: UnixUserConfig,
    pub unix_group: UnixGroupConfig,
}

fn default_schema() -> String {
    "AD-IDMU".to_string()
}

fn default_ldap_port() -> u16 {
    389
}

impl DirectoryConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("svm", &self.svm),
            ("domain", &self.domain),
            ("base_dn", &self.base_dn),
            ("share_name", &self.share_name),
            ("unix_user.name", &self.unix_user.name),
            ("unix_group.name", &self.unix_group.name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "directory.{} must not be empty",
                    field
                )));
            }
        }
        if !self.share_path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "directory.share_path '{}' must start with '/'",
                self.share_path
            )));
        }
        Ok(())
    }

    fn win_unix_pattern(&self) -> String {
        format!("{}\\\\(.+)", self.domain)
    }

    fn unix_win_replacement(&self) -> String {
        format!("{}\\\\\\1", self.domain)
    }

    fn group_pattern(&self) -> String {
        format!("{}\\\\{}", self.domain, self.unix_group.name)
    }
}

// =============================================================================
// Report
// =============================================================================

/// Configuration steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryStep {
    Nfs,
    Ldap,
    NsSwitch,
    NameMappings,
    UnixUser,
    UnixGroup,
    AdGroupMapping,
    CifsShare,
    ShareAcls,
}

impl DirectoryStep {
    pub const ALL: [DirectoryStep; 9] = [
        DirectoryStep::Nfs,
        DirectoryStep::Ldap,
        DirectoryStep::NsSwitch,
        DirectoryStep::NameMappings,
        DirectoryStep::UnixUser,
        DirectoryStep::UnixGroup,
        DirectoryStep::AdGroupMapping,
        DirectoryStep::CifsShare,
        DirectoryStep::ShareAcls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectoryStep::Nfs => "nfs",
            DirectoryStep::Ldap => "ldap",
            DirectoryStep::NsSwitch => "nsswitch",
            DirectoryStep::NameMappings => "name-mappings",
            DirectoryStep::UnixUser => "unix-user",
            DirectoryStep::UnixGroup => "unix-group",
            DirectoryStep::AdGroupMapping => "ad-group-mapping",
            DirectoryStep::CifsShare => "cifs-share",
            DirectoryStep::ShareAcls => "share-acls",
        }
    }
}

impl std::fmt::Display for DirectoryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Applied(ApplyOutcome),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: DirectoryStep,
    pub status: StepStatus,
}

/// Per-step results of a configuration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryReport {
    pub svm: String,
    pub steps: Vec<StepResult>,
}

impl DirectoryReport {
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn outcome(&self, step: DirectoryStep) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }
}

// =============================================================================
// Configurator
// =============================================================================

/// Applies a [`DirectoryConfig`] through a [`NasServicesPortRef`]
pub struct DirectoryServiceConfigurator {
    port: NasServicesPortRef,
    config: DirectoryConfig,
}

impl DirectoryServiceConfigurator {
    pub fn new(port: NasServicesPortRef, config: DirectoryConfig) -> Self {
        Self { port, config }
    }

    /// Run every step; fails only if the configuration is invalid or the SVM
    /// cannot be resolved
    pub async fn run(&self) -> Result<DirectoryReport> {
        self.config.validate()?;

        let svm = self
            .port
            .find_svm(&self.config.svm)
            .await?
            .ok_or_else(|| Error::not_found("Svm", &self.config.svm))?
            .reference();

        let mut report = DirectoryReport {
            svm: svm.name.clone(),
            steps: Vec::with_capacity(DirectoryStep::ALL.len()),
        };

        for step in DirectoryStep::ALL {
            let status = match self.apply(step, &svm).await {
                Ok(outcome) => {
                    info!("Directory step {}: {}", step, outcome);
                    StepStatus::Applied(outcome)
                }
                Err(e) => {
                    error!("Directory step {} failed: {}", step, e);
                    StepStatus::Failed(e.to_string())
                }
            };
            report.steps.push(StepResult { step, status });
        }

        Ok(report)
    }

    async fn apply(&self, step: DirectoryStep, svm: &ResourceRef) -> Result<ApplyOutcome> {
        match step {
            DirectoryStep::Nfs => self.configure_nfs(svm).await,
            DirectoryStep::Ldap => self.configure_ldap(svm).await,
            DirectoryStep::NsSwitch => self.configure_nsswitch(svm).await,
            DirectoryStep::NameMappings => self.configure_name_mappings(svm).await,
            DirectoryStep::UnixUser => self.configure_unix_user(svm).await,
            DirectoryStep::UnixGroup => self.configure_unix_group(svm).await,
            DirectoryStep::AdGroupMapping => self.configure_group_mapping(svm).await,
            DirectoryStep::CifsShare => self.configure_share(svm).await,
            DirectoryStep::ShareAcls => self.configure_share_acls(svm).await,
        }
    }

    async fn configure_nfs(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let current = self
            .port
            .get_nfs_service(svm)
            .await?
            .ok_or_else(|| Error::not_found("NfsService", &svm.name))?;

        let desired = NfsSettings {
            v3_enabled: true,
            v4_enabled: true,
            v4_id_domain: Some(self.config.domain.clone()),
        };
        if current == desired {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.port.update_nfs_service(svm, &desired).await?;
        Ok(ApplyOutcome::Updated)
    }

    async fn configure_ldap(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let mut desired = LdapConfig {
            base_dn: self.config.base_dn.clone(),
            ad_domain: Some(self.config.domain.clone()),
            bind_dn: self.config.bind_dn.clone(),
            schema: self.config.ldap_schema.clone(),
            port: self.config.ldap_port,
            enabled: true,
        };

        match self.port.get_ldap(svm).await? {
            Some(current) => {
                if desired.bind_dn.is_none() {
                    desired.bind_dn = current.bind_dn.clone();
                }
                if current == desired {
                    return Ok(ApplyOutcome::Unchanged);
                }
                self.port.update_ldap(svm, &desired).await?;
                Ok(ApplyOutcome::Updated)
            }
            None => {
                self.port.create_ldap(svm, &desired).await?;
                Ok(ApplyOutcome::Created)
            }
        }
    }

    async fn configure_nsswitch(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let sources = vec!["files".to_string(), "ldap".to_string()];
        let nsswitch: NsSwitch = ["passwd", "group", "namemap"]
            .into_iter()
            .map(|db| (db.to_string(), sources.clone()))
            .collect();

        // The SVM record does not report its current switch; always patch
        self.port.update_nsswitch(svm, &nsswitch).await?;
        Ok(ApplyOutcome::Updated)
    }

    async fn configure_name_mappings(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let desired = [
            NameMapping {
                direction: MappingDirection::WinUnix,
                index: 1,
                pattern: self.config.win_unix_pattern(),
                replacement: "\\1".to_string(),
            },
            NameMapping {
                direction: MappingDirection::UnixWin,
                index: 1,
                pattern: "(.+)".to_string(),
                replacement: self.config.unix_win_replacement(),
            },
        ];
        self.ensure_mappings(svm, &desired).await
    }

    async fn configure_group_mapping(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let desired = [NameMapping {
            direction: MappingDirection::WinUnix,
            index: 2,
            pattern: self.config.group_pattern(),
            replacement: self.config.unix_group.name.clone(),
        }];
        self.ensure_mappings(svm, &desired).await
    }

    /// Create the mappings whose direction/pattern pair is not present yet
    async fn ensure_mappings(
        &self,
        svm: &ResourceRef,
        desired: &[NameMapping],
    ) -> Result<ApplyOutcome> {
        let existing = self.port.list_name_mappings(svm, None).await?;

        let mut outcome = ApplyOutcome::Unchanged;
        for mapping in desired {
            let present = existing
                .iter()
                .any(|m| m.direction == mapping.direction && m.pattern == mapping.pattern);
            if present {
                continue;
            }
            self.port.create_name_mapping(svm, mapping).await?;
            outcome = ApplyOutcome::Created;
        }
        Ok(outcome)
    }

    async fn configure_unix_user(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let user = &self.config.unix_user;
        if self.port.find_unix_user(svm, &user.name).await?.is_some() {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.port
            .create_unix_user(
                svm,
                &UnixUser {
                    name: user.name.clone(),
                    id: user.id,
                    primary_gid: user.primary_gid,
                },
            )
            .await?;
        Ok(ApplyOutcome::Created)
    }

    async fn configure_unix_group(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let group = &self.config.unix_group;
        if self.port.find_unix_group(svm, &group.name).await?.is_some() {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.port
            .create_unix_group(
                svm,
                &UnixGroup {
                    name: group.name.clone(),
                    id: group.id,
                },
            )
            .await?;
        Ok(ApplyOutcome::Created)
    }

    async fn configure_share(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        if self
            .port
            .find_cifs_share(svm, &self.config.share_name)
            .await?
            .is_some()
        {
            return Ok(ApplyOutcome::Unchanged);
        }

        let share = CifsShare {
            name: self.config.share_name.clone(),
            path: self.config.share_path.clone(),
            properties: vec!["browsable".to_string(), "showsnapshot".to_string()],
        };
        self.port.create_cifs_share(svm, &share).await?;
        Ok(ApplyOutcome::Created)
    }

    /// Drop `Everyone`; grant full control to the group and to local admins
    async fn configure_share_acls(&self, svm: &ResourceRef) -> Result<ApplyOutcome> {
        let share = &self.config.share_name;
        let mut outcome = ApplyOutcome::Unchanged;

        if let Some(everyone) = self.port.find_share_acl(svm, share, EVERYONE).await? {
            self.port.delete_share_acl(svm, share, &everyone).await?;
            outcome = ApplyOutcome::Updated;
        }

        for principal in [self.config.unix_group.name.as_str(), ADMINISTRATORS] {
            let current = self.port.find_share_acl(svm, share, principal).await?;
            if matches!(&current, Some(acl) if acl.permission == SharePermission::FullControl) {
                continue;
            }
            if let Some(acl) = current {
                self.port.delete_share_acl(svm, share, &acl).await?;
            }
            self.port
                .create_share_acl(
                    svm,
                    share,
                    &ShareAcl::windows(principal, SharePermission::FullControl),
                )
                .await?;
            outcome = ApplyOutcome::Updated;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontap::{SimulatedCluster, SimulatedClusterBuilder};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            svm: "fsx".into(),
            domain: "CORP".into(),
            base_dn: "DC=corp,DC=example,DC=com".into(),
            bind_dn: Some("CN=svc-ldap,OU=Service,DC=corp,DC=example,DC=com".into()),
            ldap_schema: default_schema(),
            ldap_port: default_ldap_port(),
            share_name: "design_share".into(),
            share_path: "/vol1".into(),
            unix_user: UnixUserConfig {
                name: "designer".into(),
                id: 2001,
                primary_gid: 3001,
            },
            unix_group: UnixGroupConfig {
                name: "design".into(),
                id: 3001,
            },
        }
    }

    async fn cluster_with_nfs(builder: SimulatedClusterBuilder) -> Arc<SimulatedCluster> {
        use crate::domain::ports::NasServicesPort;
        let cluster = Arc::new(builder.cifs_svm("fsx", "corp.example.com").volume("fsx", "vol1").build());
        let svm = cluster.find_svm("fsx").await.unwrap().unwrap().reference();
        cluster
            .update_nfs_service(
                &svm,
                &NfsSettings {
                    v3_enabled: true,
                    v4_enabled: false,
                    v4_id_domain: None,
                },
            )
            .await
            .unwrap();
        cluster
    }

    #[test]
    fn test_mapping_patterns() {
        let config = config();
        assert_eq!(config.win_unix_pattern(), r"CORP\\(.+)");
        assert_eq!(config.unix_win_replacement(), r"CORP\\\1");
        assert_eq!(config.group_pattern(), r"CORP\\design");
    }

    #[tokio::test]
    async fn test_first_run_creates_everything() {
        let cluster = cluster_with_nfs(SimulatedCluster::builder()).await;
        let configurator = DirectoryServiceConfigurator::new(cluster.clone(), config());

        let report = configurator.run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.steps.len(), 9);
        assert_eq!(
            report.outcome(DirectoryStep::Nfs),
            Some(&StepStatus::Applied(ApplyOutcome::Updated))
        );
        assert_eq!(
            report.outcome(DirectoryStep::Ldap),
            Some(&StepStatus::Applied(ApplyOutcome::Created))
        );
        assert_eq!(
            report.outcome(DirectoryStep::CifsShare),
            Some(&StepStatus::Applied(ApplyOutcome::Created))
        );

        let acls = cluster.share_acls("svm-fsx", "design_share").await;
        let principals: Vec<_> = acls.iter().map(|a| a.user_or_group.as_str()).collect();
        assert!(!principals.contains(&EVERYONE));
        assert!(principals.contains(&"design"));
        assert!(principals.contains(&ADMINISTRATORS));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let cluster = cluster_with_nfs(SimulatedCluster::builder()).await;
        let configurator = DirectoryServiceConfigurator::new(cluster.clone(), config());

        configurator.run().await.unwrap();
        let creates_after_first = cluster.call_count("create_name_mapping").await;
        let report = configurator.run().await.unwrap();

        for result in &report.steps {
            if result.step == DirectoryStep::NsSwitch {
                continue;
            }
            assert_eq!(
                result.status,
                StepStatus::Applied(ApplyOutcome::Unchanged),
                "step {}",
                result.step
            );
        }
        assert_eq!(creates_after_first, 3);
        assert_eq!(cluster.call_count("create_name_mapping").await, 3);
        assert_eq!(cluster.call_count("create_ldap").await, 1);
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_the_rest() {
        let cluster =
            cluster_with_nfs(SimulatedCluster::builder().failing_operation("create_ldap")).await;
        let configurator = DirectoryServiceConfigurator::new(cluster.clone(), config());

        let report = configurator.run().await.unwrap();

        assert!(!report.is_success());
        let failed: Vec<_> = report.failures().map(|r| r.step).collect();
        assert_eq!(failed, vec![DirectoryStep::Ldap]);
        assert_eq!(
            report.outcome(DirectoryStep::UnixUser),
            Some(&StepStatus::Applied(ApplyOutcome::Created))
        );
    }

    #[tokio::test]
    async fn test_missing_svm_is_fatal() {
        let cluster = Arc::new(SimulatedCluster::builder().svm("other").build());
        let configurator = DirectoryServiceConfigurator::new(cluster, config());

        assert_matches!(configurator.run().await, Err(Error::NotFound { .. }));
    }

    #[test]
    fn test_config_from_yaml_uses_defaults() {
        let yaml = r#"
svm: fsx
domain: CORP
base_dn: DC=corp,DC=example,DC=com
share_name: data
share_path: /data
unix_user: { name: alice, id: 1001, primary_gid: 2001 }
unix_group: { name: eng, id: 2001 }
"#;
        let config: DirectoryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ldap_schema, "AD-IDMU");
        assert_eq!(config.ldap_port, 389);
        assert!(config.bind_dn.is_none());
        assert!(config.validate().is_ok());
    }
}
