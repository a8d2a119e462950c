//! Cluster adapters
//!
//! - `client`: the ONTAP management REST API
//! - `records`: wire shapes of that API
//! - `simulated`: an in-memory cluster for tests and dry runs

pub mod client;
pub mod records;
pub mod simulated;

pub use client::{OntapClient, OntapClientConfig};
pub use simulated::{RecordedCall, SimulatedCluster, SimulatedClusterBuilder};
