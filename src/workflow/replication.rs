//! Replication State Machine
//!
//! Drives a relationship through resume, sync wait and break. Only
//! `snapmirrored` and `broken_off` are handled; every other state is a
//! precondition failure so that nothing is attempted on a relationship in an
//! unexpected condition.

use crate::domain::ports::{
    RelationshipState, ReplicationPortRef, ReplicationRelationship, TransferState,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Policies
// =============================================================================

/// Bounds of the sync wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWaitPolicy {
    /// Delay between two relationship reads
    pub interval: Duration,
    /// Reads allowed before giving up
    pub max_attempts: u32,
    /// Wall-clock limit, checked before every read
    pub deadline: Option<Duration>,
}

impl Default for SyncWaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            // One hour at the default interval
            max_attempts: 720,
            deadline: None,
        }
    }
}

/// Whether a broken-off mirror is resynchronised before cloning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResyncPolicy {
    /// Resume, wait for the catch-up transfer, break again
    #[default]
    Always,
    /// Leave a broken-off relationship untouched and clone its current data
    Never,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a transition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The state change was requested and confirmed
    Issued(ReplicationRelationship),
    /// Nothing to do in the current state
    Skipped(ReplicationRelationship),
}

impl Transition {
    pub fn was_issued(&self) -> bool {
        matches!(self, Transition::Issued(_))
    }

    pub fn relationship(&self) -> &ReplicationRelationship {
        match self {
            Transition::Issued(rel) | Transition::Skipped(rel) => rel,
        }
    }

    pub fn into_relationship(self) -> ReplicationRelationship {
        match self {
            Transition::Issued(rel) | Transition::Skipped(rel) => rel,
        }
    }
}

/// Result of waiting for a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Latest observation
    pub relationship: ReplicationRelationship,
    /// Relationship reads issued while waiting
    pub polls: u32,
}

impl SyncOutcome {
    /// The transfer stopped in `failed`
    pub fn transfer_failed(&self) -> bool {
        matches!(
            self.relationship.transfer_state(),
            Some(TransferState::Failed)
        )
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Resume / await-sync / break over a [`ReplicationPortRef`]
pub struct ReplicationStateMachine {
    port: ReplicationPortRef,
    policy: SyncWaitPolicy,
}

impl ReplicationStateMachine {
    pub fn new(port: ReplicationPortRef, policy: SyncWaitPolicy) -> Self {
        Self { port, policy }
    }

    pub fn policy(&self) -> &SyncWaitPolicy {
        &self.policy
    }

    /// Fail unless the relationship is in a state the workflow handles
    pub fn ensure_supported(relationship: &ReplicationRelationship) -> Result<()> {
        match relationship.state {
            RelationshipState::Snapmirrored | RelationshipState::BrokenOff => Ok(()),
            ref other => Err(Error::PreconditionFailed(format!(
                "relationship {} ({}) is {}; only snapmirrored or broken_off can be refreshed",
                relationship.id, relationship.destination_path, other
            ))),
        }
    }

    /// Request `snapmirrored` for a broken-off relationship
    pub async fn resume(
        &self,
        relationship: &ReplicationRelationship,
        resync: ResyncPolicy,
    ) -> Result<Transition> {
        Self::ensure_supported(relationship)?;

        match (&relationship.state, resync) {
            (RelationshipState::BrokenOff, ResyncPolicy::Always) => {
                info!(
                    "Resuming relationship {} ({})",
                    relationship.id, relationship.destination_path
                );
                let updated = self
                    .port
                    .update_relationship_state(&relationship.id, RelationshipState::Snapmirrored)
                    .await?;
                Ok(Transition::Issued(updated))
            }
            (RelationshipState::BrokenOff, ResyncPolicy::Never) => {
                info!(
                    "Relationship {} is broken off and resync is disabled, leaving it as is",
                    relationship.id
                );
                Ok(Transition::Skipped(relationship.clone()))
            }
            _ => {
                debug!("Relationship {} already mirrored", relationship.id);
                Ok(Transition::Skipped(relationship.clone()))
            }
        }
    }

    /// Poll until the transfer is no longer `transferring`
    ///
    /// `delay_first` postpones the first read by one interval, giving a
    /// freshly requested resync time to start its transfer.
    pub async fn await_sync(
        &self,
        relationship: &ReplicationRelationship,
        delay_first: bool,
    ) -> Result<SyncOutcome> {
        let started = Instant::now();
        let mut polls = 0u32;
        let mut current = relationship.clone();

        if delay_first {
            tokio::time::sleep(self.next_pause(started)).await;
            current = self.read(&relationship.id).await?;
            polls += 1;
        }

        while current.is_transferring() {
            let deadline_passed = self
                .policy
                .deadline
                .map_or(false, |deadline| started.elapsed() >= deadline);
            if polls >= self.policy.max_attempts || deadline_passed {
                warn!(
                    "Relationship {} still transferring after {} polls",
                    current.id, polls
                );
                return Err(Error::Timeout {
                    operation: format!("transfer of relationship {} to finish", current.id),
                    waited: started.elapsed(),
                });
            }

            debug!(
                "Relationship {} transferring ({} bytes so far), poll {}",
                current.id,
                current
                    .transfer
                    .as_ref()
                    .and_then(|t| t.bytes_transferred)
                    .unwrap_or(0),
                polls + 1
            );
            tokio::time::sleep(self.next_pause(started)).await;
            current = self.read(&relationship.id).await?;
            polls += 1;
        }

        info!(
            "Relationship {} settled after {} polls (transfer {})",
            current.id,
            polls,
            current
                .transfer_state()
                .map(TransferState::as_str)
                .unwrap_or("none")
        );

        Ok(SyncOutcome {
            relationship: current,
            polls,
        })
    }

    /// Request `broken_off` for a mirrored relationship
    pub async fn break_off(&self, relationship: &ReplicationRelationship) -> Result<Transition> {
        Self::ensure_supported(relationship)?;

        if relationship.state == RelationshipState::BrokenOff {
            debug!("Relationship {} already broken off", relationship.id);
            return Ok(Transition::Skipped(relationship.clone()));
        }

        info!(
            "Breaking relationship {} ({})",
            relationship.id, relationship.destination_path
        );
        let updated = self
            .port
            .update_relationship_state(&relationship.id, RelationshipState::BrokenOff)
            .await?;
        Ok(Transition::Issued(updated))
    }

    /// One interval, cut short so the wait never sleeps past the deadline
    fn next_pause(&self, started: Instant) -> Duration {
        match self.policy.deadline {
            Some(deadline) => deadline
                .saturating_sub(started.elapsed())
                .min(self.policy.interval),
            None => self.policy.interval,
        }
    }

    async fn read(&self, id: &str) -> Result<ReplicationRelationship> {
        self.port
            .get_relationship(id)
            .await?
            .ok_or_else(|| Error::not_found("SnapmirrorRelationship", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontap::SimulatedCluster;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> SyncWaitPolicy {
        SyncWaitPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
            deadline: None,
        }
    }

    async fn relationship(cluster: &SimulatedCluster) -> ReplicationRelationship {
        use crate::domain::ports::ReplicationPort;
        cluster
            .find_relationship("svm1:vol1")
            .await
            .unwrap()
            .unwrap()
    }

    fn cluster_with(state: RelationshipState) -> crate::ontap::SimulatedClusterBuilder {
        SimulatedCluster::builder()
            .volume("svm1", "vol1")
            .relationship("r1", "src:vol0", "svm1", "vol1", state)
    }

    #[tokio::test]
    async fn test_resume_broken_off() {
        let cluster = Arc::new(cluster_with(RelationshipState::BrokenOff).build());
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));

        let rel = relationship(&cluster).await;
        let transition = machine.resume(&rel, ResyncPolicy::Always).await.unwrap();

        assert!(transition.was_issued());
        assert_eq!(transition.relationship().state, RelationshipState::Snapmirrored);
    }

    #[tokio::test]
    async fn test_resume_skipped_without_resync() {
        let cluster = Arc::new(cluster_with(RelationshipState::BrokenOff).build());
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));

        let rel = relationship(&cluster).await;
        let transition = machine.resume(&rel, ResyncPolicy::Never).await.unwrap();

        assert!(!transition.was_issued());
        assert_eq!(cluster.call_count("update_relationship_state").await, 0);
    }

    #[tokio::test]
    async fn test_await_sync_counts_polls() {
        let cluster = Arc::new(
            cluster_with(RelationshipState::Snapmirrored)
                .transferring_for("r1", 3)
                .build(),
        );
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));

        let rel = relationship(&cluster).await;
        assert!(rel.is_transferring());

        let outcome = machine.await_sync(&rel, false).await.unwrap();
        assert_eq!(outcome.polls, 4);
        assert!(!outcome.relationship.is_transferring());
        assert!(!outcome.transfer_failed());
    }

    #[tokio::test]
    async fn test_await_sync_idle_needs_no_poll() {
        let cluster = Arc::new(cluster_with(RelationshipState::Snapmirrored).build());
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));

        let rel = relationship(&cluster).await;
        let outcome = machine.await_sync(&rel, false).await.unwrap();

        assert_eq!(outcome.polls, 0);
        assert_eq!(cluster.call_count("get_relationship").await, 0);
    }

    #[tokio::test]
    async fn test_await_sync_is_bounded() {
        let cluster = Arc::new(
            cluster_with(RelationshipState::Snapmirrored)
                .transferring_for("r1", u32::MAX)
                .build(),
        );
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(5));

        let rel = relationship(&cluster).await;
        let err = machine.await_sync(&rel, false).await.unwrap_err();

        assert_matches!(err, Error::Timeout { .. });
        assert_eq!(cluster.call_count("get_relationship").await, 5);
    }

    #[tokio::test]
    async fn test_await_sync_deadline() {
        let cluster = Arc::new(
            cluster_with(RelationshipState::Snapmirrored)
                .transferring_for("r1", u32::MAX)
                .build(),
        );
        let policy = SyncWaitPolicy {
            interval: Duration::from_millis(5),
            max_attempts: u32::MAX,
            deadline: Some(Duration::from_millis(30)),
        };
        let machine = ReplicationStateMachine::new(cluster.clone(), policy);

        let rel = relationship(&cluster).await;
        assert_matches!(
            machine.await_sync(&rel, false).await,
            Err(Error::Timeout { .. })
        );
    }

    #[tokio::test]
    async fn test_await_sync_deadline_shorter_than_interval() {
        let cluster = Arc::new(
            cluster_with(RelationshipState::Snapmirrored)
                .transferring_for("r1", u32::MAX)
                .build(),
        );
        let policy = SyncWaitPolicy {
            interval: Duration::from_secs(30),
            max_attempts: u32::MAX,
            deadline: Some(Duration::from_millis(20)),
        };
        let machine = ReplicationStateMachine::new(cluster.clone(), policy);

        let rel = relationship(&cluster).await;
        let err = machine.await_sync(&rel, false).await.unwrap_err();

        assert_matches!(err, Error::Timeout { waited, .. } if waited < Duration::from_secs(5));
        assert_eq!(cluster.call_count("get_relationship").await, 1);
    }

    #[tokio::test]
    async fn test_failed_transfer_is_reported() {
        let cluster = Arc::new(
            cluster_with(RelationshipState::Snapmirrored)
                .transferring_for("r1", 1)
                .transfer_outcome(TransferState::Failed)
                .build(),
        );
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));

        let rel = relationship(&cluster).await;
        let outcome = machine.await_sync(&rel, false).await.unwrap();
        assert!(outcome.transfer_failed());
    }

    #[tokio::test]
    async fn test_break_skips_broken_off() {
        let cluster = Arc::new(cluster_with(RelationshipState::BrokenOff).build());
        let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));

        let rel = relationship(&cluster).await;
        let transition = machine.break_off(&rel).await.unwrap();

        assert!(!transition.was_issued());
        assert_eq!(cluster.call_count("update_relationship_state").await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_states_fail() {
        for state in [
            RelationshipState::Uninitialized,
            RelationshipState::Paused,
            RelationshipState::Unknown("in_sync".into()),
        ] {
            let cluster = Arc::new(cluster_with(state).build());
            let machine = ReplicationStateMachine::new(cluster.clone(), fast_policy(10));
            let rel = relationship(&cluster).await;

            assert_matches!(
                machine.resume(&rel, ResyncPolicy::Always).await,
                Err(Error::PreconditionFailed(_))
            );
            assert_matches!(
                machine.break_off(&rel).await,
                Err(Error::PreconditionFailed(_))
            );
            assert_eq!(cluster.call_count("update_relationship_state").await, 0);
        }
    }
}
