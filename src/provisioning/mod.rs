//! Provisioning helpers
//!
//! Idempotent configuration of volumes, directory services and S3 access on
//! an SVM. Each operation reads the current state first and only writes what
//! is missing or different.

pub mod directory;
pub mod object_store;
pub mod volumes;

pub use directory::{DirectoryConfig, DirectoryReport, DirectoryServiceConfigurator, DirectoryStep};
pub use object_store::{ObjectStoreProvisioner, SvmStatus};
pub use volumes::{VolumeCreateOptions, VolumeManager};

use serde::{Deserialize, Serialize};

/// What an idempotent operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    /// Creation was requested but the object is already there
    AlreadyExists,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Created | ApplyOutcome::Updated)
    }
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutcome::Created => write!(f, "created"),
            ApplyOutcome::Updated => write!(f, "updated"),
            ApplyOutcome::Unchanged => write!(f, "unchanged"),
            ApplyOutcome::AlreadyExists => write!(f, "already exists"),
        }
    }
}
