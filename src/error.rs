use thiserror::Error;

use crate::state::BrokerId;

/// Errors that prevent the process from entering the reconcile loop at all.
/// Always fatal: logged at `error` and the process exits non-zero.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("malformed --cap-map JSON: {0}")]
    InvalidCapMap(serde_json::Error),
    #[error("failed to connect to ZooKeeper at {addr}: {source}")]
    ZooKeeperUnavailable {
        addr: String,
        source: zookeeper::ZkError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Capacity Model lookup failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapacityError {
    #[error("no capacity configured for instance type {0:?}")]
    UnknownInstanceType(String),
}

/// Limits Calculator failure. Always scoped to a single
/// broker; the caller skips that broker for the tick rather than failing it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitsError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("no bandwidth metrics available for broker {0}")]
    MissingBandwidth(BrokerId),
}

/// Reassignment View failure. Metadata-backend specific.
#[derive(Error, Debug)]
pub enum ReassignmentError {
    #[error("failed to read reassignments from cluster metadata: {0}")]
    MetadataUnavailable(String),
    #[error("failed to read partition state for {topic}-{partition}: {source}")]
    PartitionStateUnavailable {
        topic: String,
        partition: i32,
        source: String,
    },
}

/// Override Store failure.
#[derive(Error, Debug)]
pub enum OverrideStoreError {
    #[error("failed to read override at {path}: {source}")]
    ReadFailed { path: String, source: String },
    #[error("failed to write override at {path}: {source}")]
    WriteFailed { path: String, source: String },
}

/// Metrics collaborator failure.
#[derive(Error, Debug)]
pub enum MetricsSourceError {
    #[error("failed to query broker metrics: {0}")]
    QueryFailed(String),
}

/// Kafka admin collaborator failure.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("failed to set throttle for broker {broker}: {source}")]
    SetThrottleFailed { broker: BrokerId, source: String },
    #[error("failed to remove throttle for broker {broker}: {source}")]
    RemoveThrottleFailed { broker: BrokerId, source: String },
    #[error("failed to remove all throttles: {0}")]
    RemoveAllFailed(String),
    #[error("failed to list brokers: {0}")]
    ListBrokersFailed(String),
}
