//! CLI / environment configuration. Every flag also
//! accepts an uppercased `AUTOTHROTTLE_*` environment variable, via clap's
//! `env` feature.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;

use crate::error::StartupError;

#[derive(Parser, Debug, Clone)]
#[command(name = "autothrottle", version, about = "Adaptive Kafka replication-throttle controller")]
pub struct Config {
    /// Reconcile period, in seconds.
    #[arg(long, env = "AUTOTHROTTLE_INTERVAL", default_value_t = 180)]
    pub interval: u64,

    /// Metrics aggregation window, in seconds.
    #[arg(long, env = "AUTOTHROTTLE_METRICS_WINDOW", default_value_t = 120)]
    pub metrics_window: u64,

    /// Floor rate, in MB/s.
    #[arg(long, env = "AUTOTHROTTLE_MIN_RATE", default_value_t = 10.0)]
    pub min_rate: f64,

    /// Ceiling for outbound (source) rate, as a percentage of capacity.
    #[arg(long, env = "AUTOTHROTTLE_MAX_TX_RATE", default_value_t = 90.0)]
    pub max_tx_rate: f64,

    /// Ceiling for inbound (destination) rate, as a percentage of capacity.
    #[arg(long, env = "AUTOTHROTTLE_MAX_RX_RATE", default_value_t = 90.0)]
    pub max_rx_rate: f64,

    /// Minimum percentage change required to rewrite an already-applied rate.
    #[arg(long, env = "AUTOTHROTTLE_CHANGE_THRESHOLD", default_value_t = 10.0)]
    pub change_threshold: f64,

    /// Consecutive failing ticks before the controller enters Degraded.
    #[arg(long, env = "AUTOTHROTTLE_FAILURE_THRESHOLD", default_value_t = 1)]
    pub failure_threshold: u32,

    /// JSON map of instance-type tag to nominal capacity in MB/s.
    #[arg(long, env = "AUTOTHROTTLE_CAP_MAP", default_value = "{}")]
    pub cap_map: String,

    /// Idle ticks before a cluster-wide throttle clear is forced.
    #[arg(long, env = "AUTOTHROTTLE_CLEANUP_AFTER", default_value_t = 60)]
    pub cleanup_after: u32,

    /// Admin HTTP API bind address.
    #[arg(long, env = "AUTOTHROTTLE_API_LISTEN", default_value = "localhost:8080")]
    pub api_listen: String,

    /// ZooKeeper connection string.
    #[arg(long, env = "AUTOTHROTTLE_ZK_ADDR")]
    pub zk_addr: String,

    /// ZooKeeper chroot prefix under which Kafka's own znodes live.
    #[arg(long, env = "AUTOTHROTTLE_ZK_PREFIX", default_value = "")]
    pub zk_prefix: String,

    /// Config namespace under which override state is persisted.
    #[arg(long, env = "AUTOTHROTTLE_ZK_CONFIG_PREFIX", default_value = "/autothrottle")]
    pub zk_config_prefix: String,

    /// Extra tags attached to every emitted event, comma-separated.
    #[arg(long, env = "AUTOTHROTTLE_DD_EVENT_TAGS", value_delimiter = ',')]
    pub dd_event_tags: Vec<String>,

    #[arg(long, env = "AUTOTHROTTLE_DD_API_KEY")]
    pub dd_api_key: Option<String>,

    #[arg(long, env = "AUTOTHROTTLE_DD_APP_KEY")]
    pub dd_app_key: Option<String>,

    #[arg(long, env = "AUTOTHROTTLE_DD_SITE", default_value = "datadoghq.com")]
    pub dd_site: String,

    /// `pretty` for human-readable logs, `json` for structured logs.
    #[arg(long, env = "AUTOTHROTTLE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window)
    }

    pub fn parse_cap_map(&self) -> Result<HashMap<String, f64>, StartupError> {
        serde_json::from_str(&self.cap_map).map_err(StartupError::InvalidCapMap)
    }

    pub fn datadog_enabled(&self) -> bool {
        self.dd_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cap_map_json() {
        let mut config = Config::parse_from([
            "autothrottle",
            "--zk-addr",
            "localhost:2181",
            "--cap-map",
            r#"{"m5.xlarge": 125.0}"#,
        ]);
        let map = config.parse_cap_map().unwrap();
        assert_eq!(map.get("m5.xlarge"), Some(&125.0));

        config.cap_map = "not json".to_owned();
        assert!(config.parse_cap_map().is_err());
    }

    #[test]
    fn defaults_match_spec() {
        let config = Config::parse_from(["autothrottle", "--zk-addr", "localhost:2181"]);
        assert_eq!(config.interval, 180);
        assert_eq!(config.min_rate, 10.0);
        assert_eq!(config.cleanup_after, 60);
        assert_eq!(config.api_listen, "localhost:8080");
    }
}
