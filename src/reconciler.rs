//! The Reconciler: the core per-tick algorithm. Owns
//! `ThrottleState` and the runtime diff state outright -- neither crosses a
//! task boundary, so no locking is required. Modeled on
//! the `run_once`/`run_once_inner` shape used by the rest of this stack's
//! periodic workers: the public entry point never returns an error, it logs
//! one and moves on, so a single bad tick never kills the loop.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capacity::CapacityModel;
use crate::events::EventSink;
use crate::health::HealthHandle;
use crate::kafka_admin::KafkaAdmin;
use crate::limits::{Limits, LimitsCalculator};
use crate::metadata::ClusterMetadata;
use crate::metrics_source::MetricsSource;
use crate::overrides::{BrokerOverride, OverrideStore};
use crate::reassignment::ReassignmentView;
use crate::state::{BrokerId, ControllerState, Phase, Role, ThrottleState};

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub limits: Limits,
    pub change_threshold_pct: f64,
    pub failure_threshold: u32,
    pub cleanup_after: u32,
    pub metrics_window: Duration,
}

pub struct Reconciler<RV, OS, MS, KA, M, ES> {
    reassignment_view: RV,
    override_store: OS,
    metrics_source: MS,
    kafka_admin: KA,
    metadata: M,
    events: ES,
    capacity: CapacityModel,
    config: ReconcilerConfig,
    throttles: ThrottleState,
    state: ControllerState,
    health: HealthHandle,
    shutdown: CancellationToken,
}

impl<RV, OS, MS, KA, M, ES> Reconciler<RV, OS, MS, KA, M, ES>
where
    RV: ReassignmentView,
    OS: OverrideStore,
    MS: MetricsSource,
    KA: KafkaAdmin,
    M: ClusterMetadata,
    ES: EventSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reassignment_view: RV,
        override_store: OS,
        metrics_source: MS,
        kafka_admin: KA,
        metadata: M,
        events: ES,
        capacity: CapacityModel,
        config: ReconcilerConfig,
        health: HealthHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reassignment_view,
            override_store,
            metrics_source,
            kafka_admin,
            metadata,
            events,
            capacity,
            config,
            throttles: ThrottleState::new(),
            state: ControllerState::default(),
            health,
            shutdown,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Runs one tick. Never returns an error: every failure mode is either
    /// transient-and-skipped or fatal-and-logged from within this function,
    /// so the loop above just calls this on a timer.
    pub async fn tick(&mut self) {
        match self.tick_inner().await {
            Ok(()) => self.health.report_healthy().await,
            Err(e) => {
                warn!("tick aborted: {}", e);
                metrics::counter!("autothrottle_tick_failures_total").increment(1);
            }
        }
    }

    async fn tick_inner(&mut self) -> Result<(), crate::error::ReassignmentError> {
        // 1. Observe reassignments.
        let (reassignments, reassigning_brokers) = self.reassignment_view.snapshot().await?;
        let topics_now: HashSet<String> = reassignments.keys().cloned().collect();
        let brokers_now = reassigning_brokers.all();

        // 2. Diff against previous tick.
        let topics_done: Vec<&String> = self.state.topics_prev.difference(&topics_now).collect();
        if !topics_done.is_empty() {
            let body = format!("topics finished reassigning: {topics_done:?}");
            self.events.write("reassignment finished", &body, &[]);
            info!(topics = ?topics_done, "reassignment finished");
        }

        let brokers_done: Vec<&BrokerId> = self.state.brokers_prev.difference(&brokers_now).collect();
        if !brokers_done.is_empty() {
            info!(brokers = ?brokers_done, "brokers no longer participating in a reassignment");
            self.throttles.retain_only(&brokers_now);
        }

        // 3. Minimise cluster chatter: only republish per-topic throttled
        // replica lists when a topic not seen last tick has started moving.
        let update_topic_lists = !topics_now.is_subset(&self.state.topics_prev);

        if topics_now.is_empty() && !self.state.topics_prev.is_empty() {
            info!("reassignment activity stopped, entering idle");
        } else if !topics_now.is_empty() && self.state.topics_prev.is_empty() {
            info!(topics = ?topics_now, "reassignment activity started");
            self.events.write(
                "reassignment started",
                &format!("topics now reassigning: {topics_now:?}"),
                &[],
            );
        }

        if self.shutdown.is_cancelled() {
            info!("shutdown requested, aborting tick before overrides are fetched");
            return Ok(());
        }

        // 4. Fetch overrides. Read failures log-and-continue with the
        // last-known values rather than assuming the override was cleared.
        let global_override = match self.override_store.get_global().await {
            Ok(v) => {
                self.state.last_known_global_override = v;
                v
            }
            Err(e) => {
                warn!("failed to read global override, using last-known value: {e}");
                self.state.last_known_global_override
            }
        };
        let broker_overrides: HashMap<BrokerId, BrokerOverride> = match self.override_store.list_broker_overrides().await {
            Ok(list) => {
                let map: HashMap<BrokerId, BrokerOverride> = list.into_iter().map(|o| (o.broker_id, o)).collect();
                self.state.last_known_broker_overrides = map.clone();
                map
            }
            Err(e) => {
                warn!("failed to read broker overrides, using last-known values: {e}");
                self.state.last_known_broker_overrides.clone()
            }
        };

        let degraded = self.state.failures_count > self.config.failure_threshold;
        let mut phase = if degraded {
            Phase::Degraded
        } else {
            Phase::Throttling
        };

        // 5. Active-reassignment pass.
        let mut any_write_failed = false;
        let mut any_write_succeeded = false;

        if !topics_now.is_empty() {
            let metrics = self
                .metrics_source
                .broker_metrics(self.config.metrics_window)
                .await;

            match metrics {
                Ok(metrics) => {
                    let calc = LimitsCalculator::new(&self.capacity, &self.config.limits);
                    let mut desired: HashMap<(BrokerId, Role), f64> = HashMap::new();

                    for broker in &brokers_now {
                        for role in reassigning_brokers.roles_for(*broker) {
                            let rate = if degraded {
                                self.config.limits.min_mbps
                            } else {
                                let current = self.throttles.last_applied(*broker, role).unwrap_or(0.0);
                                match calc.replication_headroom(*broker, role, current, &metrics) {
                                    Ok(rate) => rate,
                                    Err(e) => {
                                        warn!(broker, ?role, "skipping broker this tick: {e}");
                                        continue;
                                    }
                                }
                            };
                            desired.insert((*broker, role), rate);
                        }
                    }

                    // Global override supersedes calculated rates for every
                    // broker currently playing a role, but is still clamped.
                    if let Some(global) = &global_override {
                        if global.is_active() {
                            let rate = global.rate_mbps.max(self.config.limits.min_mbps);
                            for value in desired.values_mut() {
                                *value = rate;
                            }
                        }
                    }

                    self.apply_desired_rates(
                        &brokers_now,
                        &desired,
                        degraded,
                        &mut any_write_failed,
                        &mut any_write_succeeded,
                    )
                    .await;

                    if update_topic_lists {
                        self.republish_throttled_replicas(&reassignments).await;
                    }
                }
                Err(e) => {
                    warn!("broker metrics unavailable this tick, skipping rate updates: {e}");
                }
            }
        } else {
            phase = Phase::Idle;
        }

        if self.shutdown.is_cancelled() {
            info!("shutdown requested, aborting tick before broker overrides are applied");
            return Ok(());
        }

        // 6. Broker-specific overrides apply regardless of whether a
        // reassignment is active.
        for (broker, over) in &broker_overrides {
            if !over.config.is_active() {
                continue;
            }
            let rate = over.config.rate_mbps.max(self.config.limits.min_mbps);
            let pair = (Some(rate), Some(rate));
            if self.throttles.last_applied(*broker, Role::Leader) == Some(rate)
                && self.throttles.last_applied(*broker, Role::Follower) == Some(rate)
            {
                continue;
            }
            match self.kafka_admin.set_throttle(*broker, pair.0, pair.1).await {
                Ok(()) => {
                    self.throttles.record(*broker, Role::Leader, rate);
                    self.throttles.record(*broker, Role::Follower, rate);
                    self.state.known_throttles = true;
                    any_write_succeeded = true;
                    info!(broker, rate, "applied broker override throttle");
                    self.events.write(
                        "throttle override applied",
                        &format!("broker {broker} throttled at {rate} MB/s via override"),
                        &[],
                    );
                }
                Err(e) => {
                    any_write_failed = true;
                    warn!(broker, "failed to apply broker override: {e}");
                }
            }
        }

        // 7. Idle-state cleanup.
        if topics_now.is_empty() {
            self.state.idle_intervals += 1;
            let should_clean = self.state.known_throttles
                || self.state.idle_intervals >= self.config.cleanup_after;

            if should_clean {
                phase = Phase::Cleaning;
                match self.kafka_admin.remove_all_throttles().await {
                    Ok(()) => {
                        self.throttles.clear();
                        self.state.known_throttles = false;
                        self.state.idle_intervals = 0;
                        self.events.write(
                            "throttles cleared",
                            "cluster-wide replication throttle removed, no active reassignments",
                            &[],
                        );
                        info!("cleared all throttles, cluster idle");
                        any_write_succeeded = true;
                    }
                    Err(e) => {
                        any_write_failed = true;
                        warn!("failed to clear throttles, will retry next tick: {e}");
                    }
                }
            }

            if let Some(global) = &global_override {
                if global.auto_remove {
                    if let Err(e) = self.override_store.clear_global().await {
                        warn!("failed to auto-remove global override: {e}");
                    } else {
                        info!("auto-removed global override after reassignment completed");
                    }
                }
            }
        }

        if any_write_failed {
            self.state.failures_count += 1;
        } else if any_write_succeeded {
            self.state.failures_count = 0;
        }

        if phase != self.state.phase {
            info!(from = ?self.state.phase, to = ?phase, "controller phase transition");
        }
        self.state.phase = phase;

        // 8. Promote now -> prev.
        self.state.topics_prev = topics_now;
        self.state.brokers_prev = brokers_now;

        Ok(())
    }

    /// Writes the rates decided in step 5, applying the per-(broker, role)
    /// change-threshold test step d. A broker is only
    /// rewritten when at least one of its roles crosses the threshold; the
    /// write still carries both roles' current values forward so the single
    /// config blob never loses a role that isn't being changed this tick.
    /// `force` bypasses the threshold entirely: the Degraded floor must land
    /// on every applicable role regardless of how close the prior rate was.
    async fn apply_desired_rates(
        &mut self,
        brokers_now: &HashSet<BrokerId>,
        desired: &HashMap<(BrokerId, Role), f64>,
        force: bool,
        any_write_failed: &mut bool,
        any_write_succeeded: &mut bool,
    ) {
        for broker in brokers_now {
            let mut write_pair: (Option<f64>, Option<f64>) = (None, None);
            let mut newly_written: Vec<(Role, f64)> = Vec::new();

            for role in [Role::Leader, Role::Follower] {
                let Some(&new_rate) = desired.get(&(*broker, role)) else {
                    continue;
                };
                let prior = self.throttles.last_applied(*broker, role);
                let should_write = force
                    || match prior {
                        None => true,
                        Some(r0) if r0 == 0.0 => true,
                        Some(r0) => ((new_rate - r0).abs() / r0 * 100.0) >= self.config.change_threshold_pct,
                    };

                let rate = if should_write {
                    newly_written.push((role, new_rate));
                    new_rate
                } else {
                    prior.unwrap_or(new_rate)
                };

                match role {
                    Role::Leader => write_pair.0 = Some(rate),
                    Role::Follower => write_pair.1 = Some(rate),
                }
            }

            if newly_written.is_empty() {
                continue;
            }

            match self
                .kafka_admin
                .set_throttle(*broker, write_pair.0, write_pair.1)
                .await
            {
                Ok(()) => {
                    for (role, rate) in newly_written {
                        self.throttles.record(*broker, role, rate);
                    }
                    self.state.known_throttles = true;
                    *any_write_succeeded = true;
                }
                Err(e) => {
                    *any_write_failed = true;
                    warn!(broker, "failed to apply throttle: {e}");
                }
            }
        }
    }

    async fn republish_throttled_replicas(
        &self,
        reassignments: &crate::state::ReassignmentSet,
    ) {
        for (topic, partitions) in reassignments {
            let list = partitions
                .iter()
                .flat_map(|(partition, replicas)| {
                    replicas.iter().map(move |broker| format!("{partition}:{broker}"))
                })
                .collect::<Vec<_>>()
                .join(",");

            if let Err(e) = self.metadata.set_topic_throttled_replicas(topic, &list).await {
                warn!(topic, "failed to republish throttled-replicas list: {e}");
            }
        }
    }
}
