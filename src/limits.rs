//! Limits Calculator: turns live bandwidth, capacity,
//! and configured percentages into a safe replication rate for one broker
//! in one role.

use std::collections::HashMap;

use crate::capacity::CapacityModel;
use crate::error::LimitsError;
use crate::state::{BrokerId, BrokerMetrics, Role};

/// Operator-configured floor/ceiling percentages.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub min_mbps: f64,
    pub src_max_pct: f64,
    pub dst_max_pct: f64,
}

pub struct LimitsCalculator<'a> {
    capacity: &'a CapacityModel,
    limits: &'a Limits,
}

impl<'a> LimitsCalculator<'a> {
    pub fn new(capacity: &'a CapacityModel, limits: &'a Limits) -> Self {
        Self { capacity, limits }
    }

    /// `replication_headroom`
    ///
    /// ```text
    /// non_replication = max(0, observed_MBps - current_throttle_MBps)
    /// ceiling         = capacity * role_max_pct / 100
    /// headroom        = ceiling - non_replication
    /// rate            = clamp(headroom, min_MBps, ceiling)
    /// ```
    pub fn replication_headroom(
        &self,
        broker: BrokerId,
        role: Role,
        current_throttle_mbps: f64,
        metrics: &HashMap<BrokerId, BrokerMetrics>,
    ) -> Result<f64, LimitsError> {
        let sample = metrics
            .get(&broker)
            .ok_or(LimitsError::MissingBandwidth(broker))?;

        let capacity = self.capacity.capacity(&sample.instance_type)?;

        let (observed_mbps, max_pct) = match role {
            Role::Leader => (sample.tx_mbps, self.limits.src_max_pct),
            Role::Follower => (sample.rx_mbps, self.limits.dst_max_pct),
        };

        let non_replication = (observed_mbps - current_throttle_mbps).max(0.0);
        let ceiling = capacity * max_pct / 100.0;
        let headroom = ceiling - non_replication;

        Ok(headroom.clamp(self.limits.min_mbps, ceiling.max(self.limits.min_mbps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (CapacityModel, Limits) {
        let capacity = CapacityModel::new(HashMap::from([("m5.xlarge".to_owned(), 125.0)]));
        let limits = Limits {
            min_mbps: 10.0,
            src_max_pct: 90.0,
            dst_max_pct: 90.0,
        };
        (capacity, limits)
    }

    fn metrics_for(broker: BrokerId, tx: f64, rx: f64) -> HashMap<BrokerId, BrokerMetrics> {
        HashMap::from([(
            broker,
            BrokerMetrics {
                tx_mbps: tx,
                rx_mbps: rx,
                instance_type: "m5.xlarge".to_owned(),
            },
        )])
    }

    #[test]
    fn scenario_1_cold_start_source_and_destination_rates() {
        let (capacity, limits) = setup();
        let calc = LimitsCalculator::new(&capacity, &limits);

        let src_metrics = metrics_for(3, 60.0, 60.0);
        let rate = calc
            .replication_headroom(3, Role::Leader, 0.0, &src_metrics)
            .unwrap();
        assert!((rate - 52.5).abs() < 1e-9);

        let dst_metrics = metrics_for(4, 20.0, 20.0);
        let rate = calc
            .replication_headroom(4, Role::Follower, 0.0, &dst_metrics)
            .unwrap();
        assert!((rate - 92.5).abs() < 1e-9);
    }

    #[test]
    fn never_returns_below_min_even_with_negative_headroom() {
        let (capacity, limits) = setup();
        let calc = LimitsCalculator::new(&capacity, &limits);
        // Observed bandwidth already exceeds the ceiling even net of the
        // current throttle: headroom is deeply negative.
        let metrics = metrics_for(3, 200.0, 0.0);
        let rate = calc
            .replication_headroom(3, Role::Leader, 0.0, &metrics)
            .unwrap();
        assert_eq!(rate, limits.min_mbps);
    }

    #[test]
    fn fails_when_bandwidth_missing() {
        let (capacity, limits) = setup();
        let calc = LimitsCalculator::new(&capacity, &limits);
        let metrics = HashMap::new();
        assert_eq!(
            calc.replication_headroom(3, Role::Leader, 0.0, &metrics),
            Err(LimitsError::MissingBandwidth(3))
        );
    }

    #[test]
    fn fails_when_capacity_unknown() {
        let (capacity, limits) = setup();
        let calc = LimitsCalculator::new(&capacity, &limits);
        let metrics = HashMap::from([(
            3,
            BrokerMetrics {
                tx_mbps: 10.0,
                rx_mbps: 10.0,
                instance_type: "unknown".to_owned(),
            },
        )]);
        assert!(calc
            .replication_headroom(3, Role::Leader, 0.0, &metrics)
            .is_err());
    }
}
