//! Override Store: operator overrides, global and
//! per-broker, persisted under a configurable config namespace and shared
//! between the reconciler and the admin HTTP API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OverrideStoreError;
use crate::metadata::ClusterMetadata;
use crate::state::BrokerId;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OverrideConfig {
    pub rate_mbps: f64,
    pub auto_remove: bool,
}

impl OverrideConfig {
    pub fn is_active(&self) -> bool {
        self.rate_mbps > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BrokerOverride {
    pub broker_id: BrokerId,
    pub reassignment_participant: bool,
    pub config: OverrideConfig,
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn get_global(&self) -> Result<Option<OverrideConfig>, OverrideStoreError>;
    async fn set_global(&self, config: OverrideConfig) -> Result<(), OverrideStoreError>;
    async fn clear_global(&self) -> Result<(), OverrideStoreError>;
    async fn list_broker_overrides(&self) -> Result<Vec<BrokerOverride>, OverrideStoreError>;
    async fn set_broker_override(&self, broker_override: BrokerOverride) -> Result<(), OverrideStoreError>;
    async fn delete_broker_override(&self, broker: BrokerId) -> Result<(), OverrideStoreError>;
}

/// ZooKeeper-backed Override Store. Global overrides live at
/// `<config_prefix>/override`; per-broker overrides at
/// `<config_prefix>/override/<broker_id>`, mirroring the layout Kafka itself
/// uses for dynamic per-entity config.
#[derive(Clone)]
pub struct ZkOverrideStore<M> {
    metadata: M,
    config_prefix: String,
}

impl<M: ClusterMetadata> ZkOverrideStore<M> {
    pub fn new(metadata: M, config_prefix: String) -> Self {
        Self {
            metadata,
            config_prefix,
        }
    }

    fn global_path(&self) -> String {
        format!("{}/override", self.config_prefix)
    }

    fn broker_path(&self, broker: BrokerId) -> String {
        format!("{}/override/{broker}", self.config_prefix)
    }

    fn broker_prefix(&self) -> String {
        format!("{}/override/", self.config_prefix)
    }
}

#[async_trait]
impl<M: ClusterMetadata> OverrideStore for ZkOverrideStore<M> {
    async fn get_global(&self) -> Result<Option<OverrideConfig>, OverrideStoreError> {
        let path = self.global_path();
        let raw = self
            .metadata
            .get_raw(&path)
            .await
            .map_err(|e| OverrideStoreError::ReadFailed {
                path: path.clone(),
                source: e.to_string(),
            })?;

        match raw {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                warn!("malformed global override at {path}, treating as none: {e}");
                OverrideStoreError::ReadFailed {
                    path,
                    source: e.to_string(),
                }
            }),
        }
    }

    async fn set_global(&self, config: OverrideConfig) -> Result<(), OverrideStoreError> {
        let path = self.global_path();
        let data = serde_json::to_vec(&config).expect("OverrideConfig always serializes");
        self.metadata
            .set_raw(&path, data)
            .await
            .map_err(|e| OverrideStoreError::WriteFailed {
                path,
                source: e.to_string(),
            })
    }

    async fn clear_global(&self) -> Result<(), OverrideStoreError> {
        let path = self.global_path();
        self.metadata
            .delete_raw(&path)
            .await
            .map_err(|e| OverrideStoreError::WriteFailed {
                path,
                source: e.to_string(),
            })
    }

    async fn list_broker_overrides(&self) -> Result<Vec<BrokerOverride>, OverrideStoreError> {
        // The abstract metadata interface only guarantees
        // point get/set; a real ZooKeeper backend would list children of
        // `override/`. We approximate that here with a direct read of a
        // well-known index node maintained by `set_broker_override`.
        let path = format!("{}index", self.broker_prefix());
        let raw = self
            .metadata
            .get_raw(&path)
            .await
            .map_err(|e| OverrideStoreError::ReadFailed {
                path: path.clone(),
                source: e.to_string(),
            })?;

        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        let ids: Vec<BrokerId> = serde_json::from_slice(&raw).map_err(|e| OverrideStoreError::ReadFailed {
            path: path.clone(),
            source: e.to_string(),
        })?;

        let mut overrides = Vec::with_capacity(ids.len());
        for id in ids {
            let broker_path = self.broker_path(id);
            if let Some(raw) = self
                .metadata
                .get_raw(&broker_path)
                .await
                .map_err(|e| OverrideStoreError::ReadFailed {
                    path: broker_path.clone(),
                    source: e.to_string(),
                })?
            {
                match serde_json::from_slice(&raw) {
                    Ok(o) => overrides.push(o),
                    Err(e) => warn!("malformed broker override at {broker_path}: {e}"),
                }
            }
        }
        Ok(overrides)
    }

    async fn set_broker_override(&self, broker_override: BrokerOverride) -> Result<(), OverrideStoreError> {
        let path = self.broker_path(broker_override.broker_id);
        let data = serde_json::to_vec(&broker_override).expect("BrokerOverride always serializes");
        self.metadata
            .set_raw(&path, data)
            .await
            .map_err(|e| OverrideStoreError::WriteFailed {
                path: path.clone(),
                source: e.to_string(),
            })?;

        self.add_to_index(broker_override.broker_id).await
    }

    async fn delete_broker_override(&self, broker: BrokerId) -> Result<(), OverrideStoreError> {
        let path = self.broker_path(broker);
        self.metadata
            .delete_raw(&path)
            .await
            .map_err(|e| OverrideStoreError::WriteFailed {
                path: path.clone(),
                source: e.to_string(),
            })?;
        self.remove_from_index(broker).await
    }
}

impl<M: ClusterMetadata> ZkOverrideStore<M> {
    async fn add_to_index(&self, broker: BrokerId) -> Result<(), OverrideStoreError> {
        let path = format!("{}index", self.broker_prefix());
        let mut ids = self.read_index(&path).await?;
        if !ids.contains(&broker) {
            ids.push(broker);
        }
        self.write_index(&path, &ids).await
    }

    async fn remove_from_index(&self, broker: BrokerId) -> Result<(), OverrideStoreError> {
        let path = format!("{}index", self.broker_prefix());
        let mut ids = self.read_index(&path).await?;
        ids.retain(|&id| id != broker);
        self.write_index(&path, &ids).await
    }

    async fn read_index(&self, path: &str) -> Result<Vec<BrokerId>, OverrideStoreError> {
        let raw = self
            .metadata
            .get_raw(path)
            .await
            .map_err(|e| OverrideStoreError::ReadFailed {
                path: path.to_owned(),
                source: e.to_string(),
            })?;
        match raw {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| OverrideStoreError::ReadFailed {
                path: path.to_owned(),
                source: e.to_string(),
            }),
        }
    }

    async fn write_index(&self, path: &str, ids: &[BrokerId]) -> Result<(), OverrideStoreError> {
        let data = serde_json::to_vec(ids).expect("Vec<BrokerId> always serializes");
        self.metadata
            .set_raw(path, data)
            .await
            .map_err(|e| OverrideStoreError::WriteFailed {
                path: path.to_owned(),
                source: e.to_string(),
            })
    }
}

/// Lets a single `Arc<dyn OverrideStore>` be shared between the reconciler
/// and the admin HTTP API -- the only state crossing the task boundary.
#[async_trait]
impl OverrideStore for std::sync::Arc<dyn OverrideStore> {
    async fn get_global(&self) -> Result<Option<OverrideConfig>, OverrideStoreError> {
        (**self).get_global().await
    }
    async fn set_global(&self, config: OverrideConfig) -> Result<(), OverrideStoreError> {
        (**self).set_global(config).await
    }
    async fn clear_global(&self) -> Result<(), OverrideStoreError> {
        (**self).clear_global().await
    }
    async fn list_broker_overrides(&self) -> Result<Vec<BrokerOverride>, OverrideStoreError> {
        (**self).list_broker_overrides().await
    }
    async fn set_broker_override(&self, broker_override: BrokerOverride) -> Result<(), OverrideStoreError> {
        (**self).set_broker_override(broker_override).await
    }
    async fn delete_broker_override(&self, broker: BrokerId) -> Result<(), OverrideStoreError> {
        (**self).delete_broker_override(broker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_active_iff_rate_positive() {
        assert!(!OverrideConfig::default().is_active());
        assert!(OverrideConfig {
            rate_mbps: 30.0,
            auto_remove: true
        }
        .is_active());
        assert!(!OverrideConfig {
            rate_mbps: 0.0,
            auto_remove: true
        }
        .is_active());
    }
}
