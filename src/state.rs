//! Shared data model: broker roles, throttle rates, and the small amount of
//! state the reconciler carries from one tick to the next.

use std::collections::{HashMap, HashSet};

use crate::overrides::{BrokerOverride, OverrideConfig};

/// Kafka broker IDs are small non-negative integers.
pub type BrokerId = i32;

/// The two roles a broker can play in a reassignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Serving existing replicas to the rest of the cluster (outbound).
    Leader,
    /// Receiving a new replica (inbound).
    Follower,
}

/// Per-broker bandwidth sample as reported by the metrics collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMetrics {
    pub tx_mbps: f64,
    pub rx_mbps: f64,
    pub instance_type: String,
}

/// Target replica set per (topic, partition) under an active reassignment.
pub type ReassignmentSet = HashMap<String, HashMap<i32, Vec<BrokerId>>>;

/// The src/dst classification of brokers participating in `ReassignmentSet`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReassigningBrokers {
    pub src: HashSet<BrokerId>,
    pub dst: HashSet<BrokerId>,
}

impl ReassigningBrokers {
    pub fn all(&self) -> HashSet<BrokerId> {
        self.src.union(&self.dst).copied().collect()
    }

    pub fn roles_for(&self, broker: BrokerId) -> Vec<Role> {
        let mut roles = Vec::with_capacity(2);
        if self.src.contains(&broker) {
            roles.push(Role::Leader);
        }
        if self.dst.contains(&broker) {
            roles.push(Role::Follower);
        }
        roles
    }
}

/// A broker's most recently applied source/destination rates. `None` means
/// the role is not currently applicable to the broker -- distinct from a
/// rate of `0.0`, which means the role applies but no headroom was found.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThrottleByRole {
    pub source_mbps: Option<f64>,
    pub destination_mbps: Option<f64>,
}

impl ThrottleByRole {
    pub fn get(&self, role: Role) -> Option<f64> {
        match role {
            Role::Leader => self.source_mbps,
            Role::Follower => self.destination_mbps,
        }
    }

    pub fn set(&mut self, role: Role, rate: f64) {
        match role {
            Role::Leader => self.source_mbps = Some(rate),
            Role::Follower => self.destination_mbps = Some(rate),
        }
    }

    pub fn unset(&mut self, role: Role) {
        match role {
            Role::Leader => self.source_mbps = None,
            Role::Follower => self.destination_mbps = None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_mbps.is_none() && self.destination_mbps.is_none()
    }
}

/// In-memory record of the last-applied throttle per broker. Owned solely by
/// the reconciler; no locking is required because it never crosses a task
/// boundary.
#[derive(Debug, Default)]
pub struct ThrottleState {
    rates: HashMap<BrokerId, ThrottleByRole>,
}

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self, broker: BrokerId, role: Role) -> Option<f64> {
        self.rates.get(&broker).and_then(|t| t.get(role))
    }

    pub fn record(&mut self, broker: BrokerId, role: Role, rate: f64) {
        self.rates.entry(broker).or_default().set(role, rate);
    }

    pub fn retain_only(&mut self, keep: &HashSet<BrokerId>) {
        self.rates.retain(|broker, _| keep.contains(broker));
    }

    pub fn clear(&mut self) {
        self.rates.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// The controller's coarse-grained phase, derived each tick for logging and
/// the `/_liveness` surface. Not persisted anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Throttling,
    Degraded,
    Cleaning,
}

/// State the reconciler threads across ticks: the previous tick's
/// observations, plus the failure/idle counters that drive the Degraded and
/// Cleaning transitions.
#[derive(Debug)]
pub struct ControllerState {
    pub topics_prev: HashSet<String>,
    pub brokers_prev: HashSet<BrokerId>,
    pub failures_count: u32,
    /// True iff at least one rate has been applied since the last successful
    /// global clear. Starts `true`: a prior run of this controller may have
    /// left throttles in place, so the first idle tick should clear them.
    pub known_throttles: bool,
    pub idle_intervals: u32,
    pub phase: Phase,
    /// The last successfully-read override snapshot, held across ticks so a
    /// transient read failure falls back to it instead of silently treating
    /// the override as cleared.
    pub last_known_global_override: Option<OverrideConfig>,
    pub last_known_broker_overrides: HashMap<BrokerId, BrokerOverride>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            topics_prev: HashSet::new(),
            brokers_prev: HashSet::new(),
            failures_count: 0,
            known_throttles: true,
            idle_intervals: 0,
            phase: Phase::Idle,
            last_known_global_override: None,
            last_known_broker_overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_by_role_distinguishes_unset_from_zero() {
        let mut t = ThrottleByRole::default();
        assert_eq!(t.get(Role::Leader), None);
        t.set(Role::Leader, 0.0);
        assert_eq!(t.get(Role::Leader), Some(0.0));
        assert_ne!(t.get(Role::Leader), None);
    }

    #[test]
    fn reassigning_brokers_all_is_the_union() {
        let mut r = ReassigningBrokers::default();
        r.src.insert(1);
        r.dst.insert(2);
        r.dst.insert(1);
        assert_eq!(r.all(), HashSet::from([1, 2]));
        assert_eq!(r.roles_for(1), vec![Role::Leader, Role::Follower]);
        assert_eq!(r.roles_for(2), vec![Role::Follower]);
        assert_eq!(r.roles_for(3), vec![]);
    }

    #[test]
    fn throttle_state_tracks_last_applied_per_role() {
        let mut state = ThrottleState::new();
        assert_eq!(state.last_applied(1, Role::Leader), None);
        state.record(1, Role::Leader, 52.5);
        assert_eq!(state.last_applied(1, Role::Leader), Some(52.5));
        assert_eq!(state.last_applied(1, Role::Follower), None);

        state.retain_only(&HashSet::from([2]));
        assert_eq!(state.last_applied(1, Role::Leader), None);
        assert!(state.is_empty());
    }
}
