//! Reassignment View: turns raw cluster metadata into
//! the `(ReassignmentSet, ReassigningBrokers)` pair the reconciler needs.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::ReassignmentError;
use crate::metadata::ClusterMetadata;
use crate::state::{BrokerId, ReassignmentSet, ReassigningBrokers};

#[async_trait]
pub trait ReassignmentView: Send + Sync {
    async fn snapshot(&self) -> Result<(ReassignmentSet, ReassigningBrokers), ReassignmentError>;
}

/// Classifies brokers by comparing each reassigning partition's current
/// replica set against its target replica set:
///
/// - brokers in `target \ current` are destinations
/// - brokers in `current \ target`, plus the current leader if it remains
///   in `target`, are sources (the leader keeps serving the replica while
///   new followers catch up)
pub struct MetadataReassignmentView<M> {
    metadata: M,
}

impl<M: ClusterMetadata> MetadataReassignmentView<M> {
    pub fn new(metadata: M) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl<M: ClusterMetadata> ReassignmentView for MetadataReassignmentView<M> {
    async fn snapshot(&self) -> Result<(ReassignmentSet, ReassigningBrokers), ReassignmentError> {
        let reassignments = self.metadata.get_reassignments().await?;

        let mut brokers = ReassigningBrokers::default();

        for (topic, partitions) in &reassignments {
            for (&partition, target) in partitions {
                let current = self
                    .metadata
                    .get_partition_state(topic, partition)
                    .await?;
                classify(&current, target, &mut brokers);
            }
        }

        Ok((reassignments, brokers))
    }
}

fn classify(current: &[BrokerId], target: &[BrokerId], brokers: &mut ReassigningBrokers) {
    let current_set: HashSet<BrokerId> = current.iter().copied().collect();
    let target_set: HashSet<BrokerId> = target.iter().copied().collect();

    for &broker in &target_set {
        if !current_set.contains(&broker) {
            brokers.dst.insert(broker);
        }
    }
    for &broker in &current_set {
        if !target_set.contains(&broker) {
            brokers.src.insert(broker);
        }
    }
    if let Some(&leader) = current.first() {
        if target_set.contains(&leader) {
            brokers.src.insert(leader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_classification() {
        let mut brokers = ReassigningBrokers::default();
        classify(&[1, 2, 3], &[1, 2, 4], &mut brokers);
        assert_eq!(brokers.src, HashSet::from([3]));
        assert_eq!(brokers.dst, HashSet::from([4]));
    }

    #[test]
    fn leader_remaining_in_target_counts_as_source() {
        let mut brokers = ReassigningBrokers::default();
        // Leader (1) stays in the replica set, a follower (3) is replaced by 4.
        classify(&[1, 3], &[1, 4], &mut brokers);
        assert_eq!(brokers.src, HashSet::from([1, 3]));
        assert_eq!(brokers.dst, HashSet::from([4]));
    }

    #[test]
    fn broker_can_be_both_source_and_destination() {
        let mut brokers = ReassigningBrokers::default();
        classify(&[1, 2, 3], &[1, 2, 4], &mut brokers);
        classify(&[4, 5, 6], &[3, 5, 6], &mut brokers);
        assert!(brokers.src.contains(&3));
        assert!(brokers.dst.contains(&3));
        assert!(brokers.all().contains(&3));
    }
}
