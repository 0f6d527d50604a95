//! Kafka admin collaborator: applies and removes
//! per-broker replication throttles. Kafka exposes this as dynamic broker
//! config (`leader.replication.throttled.rate` /
//! `follower.replication.throttled.rate`) under
//! `/config/brokers/<broker_id>` in ZooKeeper; this implementation targets
//! that znode layout directly, as the admin protocol path would.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AdminError;
use crate::metadata::ClusterMetadata;
use crate::state::BrokerId;

#[async_trait]
pub trait KafkaAdmin: Send + Sync {
    /// `None` for a rate means that role does not apply to this broker right
    /// now and its config key is left untouched: unset vs 0.0 is load-bearing
    /// all the way down to the write itself.
    async fn set_throttle(
        &self,
        broker: BrokerId,
        source_mbps: Option<f64>,
        destination_mbps: Option<f64>,
    ) -> Result<(), AdminError>;
    async fn remove_throttle(&self, broker: BrokerId) -> Result<(), AdminError>;
    async fn remove_all_throttles(&self) -> Result<(), AdminError>;
    async fn list_brokers(&self) -> Result<Vec<BrokerId>, AdminError>;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct BrokerThrottleConfig {
    #[serde(
        rename = "leader.replication.throttled.rate",
        skip_serializing_if = "Option::is_none"
    )]
    leader_rate_bytes_per_sec: Option<u64>,
    #[serde(
        rename = "follower.replication.throttled.rate",
        skip_serializing_if = "Option::is_none"
    )]
    follower_rate_bytes_per_sec: Option<u64>,
}

fn mbps_to_bytes_per_sec(mbps: f64) -> u64 {
    (mbps * 1024.0 * 1024.0).round() as u64
}

/// Applies throttles as ZooKeeper dynamic broker config, matching how
/// `kafka-reassign-partitions.sh` itself manipulates dynamic config; broker
/// discovery likewise goes through the cluster metadata collaborator
/// (`/brokers/ids`) rather than the Kafka wire protocol.
pub struct ZkKafkaAdmin<M> {
    metadata: M,
}

impl<M: ClusterMetadata> ZkKafkaAdmin<M> {
    pub fn new(metadata: M) -> Self {
        Self { metadata }
    }

    fn broker_config_path(&self, broker: BrokerId) -> String {
        format!("/config/brokers/{broker}")
    }
}

#[async_trait]
impl<M: ClusterMetadata> KafkaAdmin for ZkKafkaAdmin<M> {
    async fn set_throttle(
        &self,
        broker: BrokerId,
        source_mbps: Option<f64>,
        destination_mbps: Option<f64>,
    ) -> Result<(), AdminError> {
        let config = BrokerThrottleConfig {
            leader_rate_bytes_per_sec: source_mbps.map(mbps_to_bytes_per_sec),
            follower_rate_bytes_per_sec: destination_mbps.map(mbps_to_bytes_per_sec),
        };
        let data = serde_json::to_vec(&config).expect("BrokerThrottleConfig always serializes");

        self.metadata
            .set_raw(&self.broker_config_path(broker), data)
            .await
            .map_err(|e| AdminError::SetThrottleFailed {
                broker,
                source: e.to_string(),
            })?;

        info!(
            broker,
            ?source_mbps, ?destination_mbps, "applied replication throttle"
        );
        Ok(())
    }

    async fn remove_throttle(&self, broker: BrokerId) -> Result<(), AdminError> {
        self.metadata
            .delete_raw(&self.broker_config_path(broker))
            .await
            .map_err(|e| AdminError::RemoveThrottleFailed {
                broker,
                source: e.to_string(),
            })
    }

    async fn remove_all_throttles(&self) -> Result<(), AdminError> {
        for broker in self.list_brokers().await? {
            self.remove_throttle(broker).await?;
        }
        Ok(())
    }

    async fn list_brokers(&self) -> Result<Vec<BrokerId>, AdminError> {
        self.metadata
            .list_broker_ids()
            .await
            .map_err(|e| AdminError::ListBrokersFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_mbps_to_bytes_per_sec() {
        assert_eq!(mbps_to_bytes_per_sec(1.0), 1024 * 1024);
        assert_eq!(mbps_to_bytes_per_sec(52.5), (52.5 * 1024.0 * 1024.0).round() as u64);
    }
}
