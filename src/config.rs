//! Configuration file
//!
//! A YAML document with three optional sections:
//!
//! ```yaml
//! cluster:
//!   endpoint: management.fs-0123.fsx.eu-west-1.amazonaws.com
//!   username: fsxadmin
//!   password: secret
//! clone_refresh:
//!   svm: fsx0svm1
//!   volume: vol_secondary
//!   clone_name: vol_secondary_clone
//!   junction_path: /vol_secondary_clone
//! directory:
//!   svm: fsx0svm1
//!   domain: CORP
//!   ...
//! ```
//!
//! Command line flags and environment variables take precedence over the
//! file.

use crate::error::{Error, Result};
use crate::ontap::OntapClientConfig;
use crate::provisioning::DirectoryConfig;
use crate::workflow::{CloneRefreshConfig, ResyncPolicy, SyncWaitPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub clone_refresh: Option<CloneRefreshSection>,

    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        if let Some(section) = &self.clone_refresh {
            section.to_workflow_config().validate()?;
        }
        if let Some(directory) = &self.directory {
            directory.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// Management endpoint and credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSection {
    /// Host name, IP or URL of the management endpoint
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub verify_tls: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_secs: u64,

    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_username() -> String {
    "fsxadmin".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_job_poll_interval() -> u64 {
    1
}

fn default_job_timeout() -> u64 {
    300
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: default_username(),
            password: String::new(),
            verify_tls: false,
            request_timeout_secs: default_request_timeout(),
            job_poll_interval_secs: default_job_poll_interval(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl ClusterSection {
    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 || self.job_timeout_secs == 0 {
            return Err(Error::Configuration(
                "cluster timeouts must be at least one second".into(),
            ));
        }
        if self.job_poll_interval_secs == 0 {
            return Err(Error::Configuration(
                "cluster.job_poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn to_client_config(&self) -> OntapClientConfig {
        OntapClientConfig {
            endpoint: self.endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            verify_tls: self.verify_tls,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            job_poll_interval: Duration::from_secs(self.job_poll_interval_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }
}

// =============================================================================
// Clone Refresh
// =============================================================================

/// Defaults for `clone-refresh`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRefreshSection {
    pub svm: String,
    pub volume: String,
    pub clone_name: String,

    #[serde(default)]
    pub junction_path: Option<String>,

    #[serde(default)]
    pub resync: ResyncPolicy,

    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: u32,

    #[serde(default)]
    pub sync_deadline_secs: Option<u64>,
}

fn default_sync_interval() -> u64 {
    5
}

fn default_sync_max_attempts() -> u32 {
    720
}

impl CloneRefreshSection {
    pub fn to_workflow_config(&self) -> CloneRefreshConfig {
        let mut config = CloneRefreshConfig::new(&self.svm, &self.volume, &self.clone_name);
        config.junction_path = self.junction_path.clone();
        config.resync = self.resync;
        config.sync = SyncWaitPolicy {
            interval: Duration::from_secs(self.sync_interval_secs),
            max_attempts: self.sync_max_attempts,
            deadline: self.sync_deadline_secs.map(Duration::from_secs),
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());

        let client = config.cluster.to_client_config();
        assert_eq!(client.username, "fsxadmin");
        assert!(!client.verify_tls);
        assert_eq!(client.request_timeout, Duration::from_secs(60));
        assert_eq!(client.job_poll_interval, Duration::from_secs(1));
        assert_eq!(client.job_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_clone_refresh_section() {
        let yaml = r#"
cluster:
  endpoint: 198.19.255.10
  password: secret
clone_refresh:
  svm: fsx0svm1
  volume: vol_secondary
  clone_name: vol_secondary_clone
  junction_path: /vol_secondary_clone
  resync: never
  sync_deadline_secs: 600
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cluster.endpoint, "198.19.255.10");

        let workflow = config.clone_refresh.unwrap().to_workflow_config();
        assert_eq!(workflow.svm_name, "fsx0svm1");
        assert_eq!(workflow.junction_path.as_deref(), Some("/vol_secondary_clone"));
        assert_eq!(workflow.resync, ResyncPolicy::Never);
        assert_eq!(workflow.sync.interval, Duration::from_secs(5));
        assert_eq!(workflow.sync.max_attempts, 720);
        assert_eq!(workflow.sync.deadline, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid_sections_are_configuration_errors() {
        let same_name = r#"
clone_refresh:
  svm: svm1
  volume: vol1
  clone_name: vol1
"#;
        assert_matches!(
            AppConfig::from_yaml(same_name),
            Err(Error::Configuration(_))
        );

        let zero_poll = "cluster:\n  job_poll_interval_secs: 0\n";
        assert_matches!(
            AppConfig::from_yaml(zero_poll),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_missing_required_field() {
        let yaml = "clone_refresh:\n  svm: svm1\n  volume: vol1\n";
        assert_matches!(AppConfig::from_yaml(yaml), Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "cluster:\n  endpoint: https://fsx.example.com\n  verify_tls: true"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster.endpoint, "https://fsx.example.com");
        assert!(config.cluster.verify_tls);
        assert!(config.clone_refresh.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            AppConfig::from_file(dir.path().join("absent.yaml")),
            Err(Error::Configuration(_))
        );
    }
}
