//! ONTAP NAS Admin - Administrative automation for ONTAP NAS clusters
//!
//! Talks to an ONTAP-class cluster (such as Amazon FSx for NetApp ONTAP)
//! through its management REST API and automates the recurring
//! administrative jobs around it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                   CLI                                        │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │      Clone Refresh          │  │          Provisioning               │   │
//! │  │  resolve → purge → resume   │  │  volumes · directory · S3           │   │
//! │  │  → sync → break → clone     │  │                                     │   │
//! │  └──────────────┬──────────────┘  └──────────────────┬──────────────────┘   │
//! │                 └──────────────────┬─────────────────┘                      │
//! ├────────────────────────────────────┼────────────────────────────────────────┤
//! │                             Domain Ports                                     │
//! │      Replication  ·  Volume  ·  NAS Services  ·  Object Store               │
//! ├────────────────────────────────────┼────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐  ┌┴────────────────────────────────────┐   │
//! │  │   OntapClient (REST/JSON)   │  │   SimulatedCluster (in-memory)      │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`workflow`]: Mirror-break-and-clone refresh of a replication destination
//! - [`provisioning`]: Volume, directory service and S3 configuration
//! - [`ontap`]: REST client and simulated cluster implementing the ports
//! - [`domain`]: Core domain types and port traits
//! - [`config`]: YAML configuration file
//! - [`error`]: Error types and handling

pub mod config;
pub mod domain;
pub mod error;
pub mod ontap;
pub mod provisioning;
pub mod workflow;

// Re-export commonly used types
pub use config::{AppConfig, CloneRefreshSection, ClusterSection};

pub use domain::ports::{
    NasServicesPort, ObjectStorePort, RelationshipState, ReplicationPort,
    ReplicationRelationship, Volume, VolumePort,
};

pub use error::{Error, Result};

pub use ontap::{OntapClient, OntapClientConfig, SimulatedCluster};

pub use provisioning::{
    ApplyOutcome, DirectoryConfig, DirectoryServiceConfigurator, ObjectStoreProvisioner,
    VolumeCreateOptions, VolumeManager,
};

pub use workflow::{
    CloneRefreshConfig, CloneRefreshWorkflow, ResyncPolicy, SyncWaitPolicy, WorkflowReport,
    WorkflowStage, WorkflowWarning,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
