//! Cluster metadata collaborator: the ZooKeeper-shaped
//! abstract interface the Reassignment View and Override Store are built
//! on. Kafka itself keeps reassignment state, current replica assignments,
//! and per-topic dynamic config under well-known ZooKeeper znodes; this
//! module is a thin, blocking wrapper around that layout, moved onto a
//! blocking-task pool so the async reconciler never stalls the runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zookeeper::{Acl, CreateMode, ZkError, ZooKeeper};

use crate::error::ReassignmentError;
use crate::state::{BrokerId, ReassignmentSet};

#[async_trait]
pub trait ClusterMetadata: Send + Sync + Clone + 'static {
    async fn get_reassignments(&self) -> Result<ReassignmentSet, ReassignmentError>;
    async fn get_partition_state(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Vec<BrokerId>, ReassignmentError>;
    async fn set_topic_throttled_replicas(
        &self,
        topic: &str,
        replicas: &str,
    ) -> Result<(), ReassignmentError>;
    async fn clear_topic_throttled_replicas(&self, topic: &str) -> Result<(), ReassignmentError>;

    /// Broker IDs currently registered under `/brokers/ids`, used by the
    /// Kafka admin collaborator to discover which brokers to clear throttles
    /// on.
    async fn list_broker_ids(&self) -> Result<Vec<BrokerId>, ReassignmentError>;

    /// Raw read/write at an arbitrary config path, used by the Override
    /// Store. `None` means the path does not exist.
    async fn get_raw(&self, path: &str) -> Result<Option<Vec<u8>>, ZkError>;
    async fn set_raw(&self, path: &str, value: Vec<u8>) -> Result<(), ZkError>;
    async fn delete_raw(&self, path: &str) -> Result<(), ZkError>;
}

#[derive(Debug, Deserialize)]
struct ReassignPartitionsZnode {
    partitions: Vec<ReassignedPartition>,
}

#[derive(Debug, Deserialize)]
struct ReassignedPartition {
    topic: String,
    partition: i32,
    replicas: Vec<BrokerId>,
}

#[derive(Debug, Deserialize)]
struct TopicAssignmentZnode {
    partitions: HashMap<String, Vec<BrokerId>>,
}

#[derive(Debug, Serialize)]
struct ThrottledReplicasConfig<'a> {
    #[serde(rename = "leader.replication.throttled.replicas")]
    leader: &'a str,
    #[serde(rename = "follower.replication.throttled.replicas")]
    follower: &'a str,
}

#[derive(Clone)]
pub struct ZkClusterMetadata {
    zk: Arc<ZooKeeper>,
    prefix: String,
}

impl ZkClusterMetadata {
    pub async fn connect(addr: &str, prefix: String, session_timeout: Duration) -> Result<Self, ZkError> {
        let addr = addr.to_owned();
        let zk = tokio::task::spawn_blocking(move || {
            ZooKeeper::connect(&addr, session_timeout, LoggingWatcher)
        })
        .await
        .expect("zookeeper connect task panicked")?;

        Ok(Self {
            zk: Arc::new(zk),
            prefix,
        })
    }

    fn path(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    async fn read_znode(&self, path: String) -> Result<Option<Vec<u8>>, ZkError> {
        let zk = self.zk.clone();
        tokio::task::spawn_blocking(move || match zk.get_data(&path, false) {
            Ok((data, _stat)) => Ok(Some(data)),
            Err(ZkError::NoNode) => Ok(None),
            Err(e) => Err(e),
        })
        .await
        .expect("zookeeper read task panicked")
    }

    async fn write_znode(&self, path: String, data: Vec<u8>) -> Result<(), ZkError> {
        let zk = self.zk.clone();
        tokio::task::spawn_blocking(move || {
            match zk.set_data(&path, data.clone(), None) {
                Ok(()) => Ok(()),
                Err(ZkError::NoNode) => zk
                    .create(&path, data, Acl::open_unsafe().clone(), CreateMode::Persistent)
                    .map(|_| ()),
                Err(e) => Err(e),
            }
        })
        .await
        .expect("zookeeper write task panicked")
    }
}

struct LoggingWatcher;
impl zookeeper::Watcher for LoggingWatcher {
    fn handle(&self, event: zookeeper::WatchedEvent) {
        debug!("zookeeper session event: {:?}", event.keeper_state);
    }
}

#[async_trait]
impl ClusterMetadata for ZkClusterMetadata {
    async fn get_reassignments(&self) -> Result<ReassignmentSet, ReassignmentError> {
        let raw = self
            .read_znode(self.path("/admin/reassign_partitions"))
            .await
            .map_err(|e| ReassignmentError::MetadataUnavailable(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(ReassignmentSet::new());
        };

        let znode: ReassignPartitionsZnode = serde_json::from_slice(&raw)
            .map_err(|e| ReassignmentError::MetadataUnavailable(e.to_string()))?;

        let mut set = ReassignmentSet::new();
        for p in znode.partitions {
            set.entry(p.topic).or_default().insert(p.partition, p.replicas);
        }
        Ok(set)
    }

    async fn get_partition_state(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Vec<BrokerId>, ReassignmentError> {
        let raw = self
            .read_znode(self.path(&format!("/brokers/topics/{topic}")))
            .await
            .map_err(|e| ReassignmentError::PartitionStateUnavailable {
                topic: topic.to_owned(),
                partition,
                source: e.to_string(),
            })?;

        let raw = raw.ok_or_else(|| ReassignmentError::PartitionStateUnavailable {
            topic: topic.to_owned(),
            partition,
            source: "topic znode missing".to_owned(),
        })?;

        let znode: TopicAssignmentZnode = serde_json::from_slice(&raw).map_err(|e| {
            ReassignmentError::PartitionStateUnavailable {
                topic: topic.to_owned(),
                partition,
                source: e.to_string(),
            }
        })?;

        znode
            .partitions
            .get(&partition.to_string())
            .cloned()
            .ok_or_else(|| ReassignmentError::PartitionStateUnavailable {
                topic: topic.to_owned(),
                partition,
                source: "partition missing from topic znode".to_owned(),
            })
    }

    async fn set_topic_throttled_replicas(
        &self,
        topic: &str,
        replicas: &str,
    ) -> Result<(), ReassignmentError> {
        let config = ThrottledReplicasConfig {
            leader: replicas,
            follower: replicas,
        };
        let data = serde_json::to_vec(&config)
            .map_err(|e| ReassignmentError::MetadataUnavailable(e.to_string()))?;
        self.write_znode(self.path(&format!("/config/topics/{topic}")), data)
            .await
            .map_err(|e| ReassignmentError::MetadataUnavailable(e.to_string()))
    }

    async fn clear_topic_throttled_replicas(&self, topic: &str) -> Result<(), ReassignmentError> {
        self.set_topic_throttled_replicas(topic, "").await
    }

    async fn list_broker_ids(&self) -> Result<Vec<BrokerId>, ReassignmentError> {
        let zk = self.zk.clone();
        let path = self.path("/brokers/ids");
        let ids = tokio::task::spawn_blocking(move || zk.get_children(&path, false))
            .await
            .expect("zookeeper get_children task panicked")
            .map_err(|e| ReassignmentError::MetadataUnavailable(e.to_string()))?;

        Ok(ids
            .into_iter()
            .filter_map(|id| id.parse::<BrokerId>().ok())
            .collect())
    }

    async fn get_raw(&self, path: &str) -> Result<Option<Vec<u8>>, ZkError> {
        self.read_znode(path.to_owned()).await
    }

    async fn set_raw(&self, path: &str, value: Vec<u8>) -> Result<(), ZkError> {
        self.write_znode(path.to_owned(), value).await
    }

    async fn delete_raw(&self, path: &str) -> Result<(), ZkError> {
        let zk = self.zk.clone();
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || match zk.delete(&path, None) {
            Ok(()) | Err(ZkError::NoNode) => Ok(()),
            Err(e) => Err(e),
        })
        .await
        .expect("zookeeper delete task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reassign_partitions_znode() {
        let raw = br#"{"version":1,"partitions":[{"topic":"T","partition":0,"replicas":[1,2,4]}]}"#;
        let znode: ReassignPartitionsZnode = serde_json::from_slice(raw).unwrap();
        assert_eq!(znode.partitions[0].topic, "T");
        assert_eq!(znode.partitions[0].replicas, vec![1, 2, 4]);
    }

    #[test]
    fn parses_topic_assignment_znode() {
        let raw = br#"{"version":1,"partitions":{"0":[1,2,3],"1":[1,2,3]}}"#;
        let znode: TopicAssignmentZnode = serde_json::from_slice(raw).unwrap();
        assert_eq!(znode.partitions.get("0"), Some(&vec![1, 2, 3]));
    }
}
