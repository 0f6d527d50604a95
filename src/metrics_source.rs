//! Metrics collaborator: per-broker tx/rx bandwidth and
//! instance-type tag over a rolling window, queried from Datadog.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::MetricsSourceError;
use crate::state::{BrokerId, BrokerMetrics};

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn broker_metrics(
        &self,
        window: Duration,
    ) -> Result<HashMap<BrokerId, BrokerMetrics>, MetricsSourceError>;
}

/// `tx_metric`/`rx_metric` report raw bytes/sec; `BrokerMetrics` and every
/// downstream rate calculation are in MB/s.
fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec / (1024.0 * 1024.0)
}

#[derive(Debug, Clone)]
pub struct DatadogConfig {
    pub site: String,
    pub api_key: String,
    pub app_key: String,
    /// Metric names reporting per-broker outbound/inbound bytes/sec and the
    /// tag key carrying the broker's instance type, e.g. `kafka.broker_id`
    /// and `instance-type`.
    pub tx_metric: String,
    pub rx_metric: String,
    pub broker_tag: String,
    pub instance_type_tag: String,
}

pub struct DatadogMetricsSource {
    client: reqwest::Client,
    config: DatadogConfig,
}

impl DatadogMetricsSource {
    pub fn new(config: DatadogConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn query_series(&self, metric: &str, window: Duration) -> Result<Vec<Series>, MetricsSourceError> {
        let now = chrono::Utc::now().timestamp();
        let from = now - window.as_secs() as i64;

        let url = format!("https://api.{}/api/v1/query", self.config.site);
        let response = self
            .client
            .get(url)
            .header("DD-API-KEY", &self.config.api_key)
            .header("DD-APPLICATION-KEY", &self.config.app_key)
            .query(&[
                ("from", from.to_string()),
                ("to", now.to_string()),
                ("query", format!("avg:{metric}{{*}} by {{broker_id,instance_type}}")),
            ])
            .send()
            .await
            .map_err(|e| MetricsSourceError::QueryFailed(e.to_string()))?;

        let body: QueryResponse = response
            .error_for_status()
            .map_err(|e| MetricsSourceError::QueryFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| MetricsSourceError::QueryFailed(e.to_string()))?;

        Ok(body.series)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    scope: String,
    pointlist: Vec<(f64, Option<f64>)>,
}

impl Series {
    fn latest_value(&self) -> Option<f64> {
        self.pointlist.iter().rev().find_map(|(_, v)| *v)
    }

    /// Datadog scopes series by the `by` tags, e.g. `broker_id:3,instance_type:m5.xlarge`.
    fn tag(&self, key: &str) -> Option<&str> {
        self.scope
            .split(',')
            .find_map(|kv| kv.strip_prefix(&format!("{key}:")))
    }
}

#[async_trait]
impl MetricsSource for DatadogMetricsSource {
    async fn broker_metrics(
        &self,
        window: Duration,
    ) -> Result<HashMap<BrokerId, BrokerMetrics>, MetricsSourceError> {
        let tx_series = self.query_series(&self.config.tx_metric, window).await?;
        let rx_series = self.query_series(&self.config.rx_metric, window).await?;

        let mut result: HashMap<BrokerId, BrokerMetrics> = HashMap::new();

        for series in &tx_series {
            let Some(broker) = series.tag(&self.config.broker_tag).and_then(|s| s.parse().ok()) else {
                continue;
            };
            let Some(tx_mbps) = series.latest_value() else {
                continue;
            };
            let instance_type = series
                .tag(&self.config.instance_type_tag)
                .unwrap_or("unknown")
                .to_owned();
            result.insert(
                broker,
                BrokerMetrics {
                    tx_mbps: bytes_per_sec_to_mbps(tx_mbps),
                    rx_mbps: 0.0,
                    instance_type,
                },
            );
        }

        for series in &rx_series {
            let Some(broker) = series.tag(&self.config.broker_tag).and_then(|s| s.parse().ok()) else {
                continue;
            };
            let Some(rx_mbps) = series.latest_value() else {
                continue;
            };
            match result.get_mut(&broker) {
                Some(m) => m.rx_mbps = bytes_per_sec_to_mbps(rx_mbps),
                None => warn!(broker, "rx metric reported for broker with no tx metric, skipping"),
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_tag_parses_datadog_scope_string() {
        let series = Series {
            scope: "broker_id:3,instance_type:m5.xlarge".to_owned(),
            pointlist: vec![(0.0, Some(60.0))],
        };
        assert_eq!(series.tag("broker_id"), Some("3"));
        assert_eq!(series.tag("instance_type"), Some("m5.xlarge"));
        assert_eq!(series.latest_value(), Some(60.0));
    }

    #[test]
    fn latest_value_skips_trailing_nulls() {
        let series = Series {
            scope: "broker_id:3,instance_type:m5.xlarge".to_owned(),
            pointlist: vec![(0.0, Some(10.0)), (1.0, None)],
        };
        assert_eq!(series.latest_value(), Some(10.0));
    }

    #[test]
    fn converts_bytes_per_sec_to_mbps() {
        assert!((bytes_per_sec_to_mbps(1024.0 * 1024.0) - 1.0).abs() < 1e-9);
        assert!((bytes_per_sec_to_mbps(50.0 * 1024.0 * 1024.0) - 50.0).abs() < 1e-9);
    }
}
