use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::Result;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod capacity;
mod config;
mod error;
mod events;
mod handlers;
mod health;
mod kafka_admin;
mod limits;
mod metadata;
mod metrics;
mod metrics_source;
mod overrides;
mod reassignment;
mod reconciler;
mod state;

use capacity::CapacityModel;
use config::Config;
use error::StartupError;
use events::{DatadogEventSink, EventSink, LoggingEventSink};
use handlers::AppContext;
use health::{HealthHandle, HealthRegistry};
use kafka_admin::ZkKafkaAdmin;
use limits::Limits;
use metadata::ZkClusterMetadata;
use metrics_source::{DatadogConfig, DatadogMetricsSource};
use overrides::{OverrideStore, ZkOverrideStore};
use reassignment::MetadataReassignmentView;
use reconciler::{Reconciler, ReconcilerConfig};

const ZK_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TX_METRIC: &str = "kafka.broker.bytes_out_per_sec";
const DEFAULT_RX_METRIC: &str = "kafka.broker.bytes_in_per_sec";
const DEFAULT_BROKER_TAG: &str = "broker_id";
const DEFAULT_INSTANCE_TYPE_TAG: &str = "instance_type";

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn fatal(err: impl std::fmt::Display) -> ! {
    eprintln!("autothrottle: fatal startup error: {err}");
    error!("fatal startup error: {err}");
    std::process::exit(1)
}

/// Waits for SIGINT or SIGTERM, then cancels `shutdown`. The reconcile loop
/// and the admin HTTP server both select on `shutdown.cancelled()` so a
/// single signal drains both: cancellation is cooperative, so the current
/// tick finishes its in-flight step before exiting.
async fn wait_for_shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

/// Runs the reconcile loop on a fixed-period ticker. Overlapping ticks are
/// dropped rather than queued: a tick still running when
/// the next boundary arrives is skipped, with a log line and a counter,
/// instead of serializing behind a blocking semaphore acquire.
async fn reconcile_loop<RV, OS, MS, KA, M, ES>(
    mut reconciler: Reconciler<RV, OS, MS, KA, M, ES>,
    interval_secs: u64,
    shutdown: CancellationToken,
) where
    RV: reassignment::ReassignmentView + Send + 'static,
    OS: OverrideStore + Send + 'static,
    MS: metrics_source::MetricsSource + Send + 'static,
    KA: kafka_admin::KafkaAdmin + Send + 'static,
    M: metadata::ClusterMetadata + Send + 'static,
    ES: EventSink + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(1));
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("reconcile loop shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            ::metrics::counter!("autothrottle_ticks_dropped_total").increment(1);
            warn!("previous tick still running, dropping this tick boundary");
            continue;
        };

        reconciler.tick().await;
        drop(permit);
    }
}

async fn serve_admin_api(context: Arc<AppContext>, bind: String, shutdown: CancellationToken) -> Result<()> {
    let router = handlers::app(context, true);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind, "admin HTTP API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config.log_format);

    let cap_map = match config.parse_cap_map() {
        Ok(m) => m,
        Err(e) => fatal(e),
    };

    if config.dd_api_key.is_none() || config.dd_app_key.is_none() {
        fatal(StartupError::InvalidConfig(
            "dd-api-key and dd-app-key are both required (no other metrics backend is supported)".to_owned(),
        ));
    }

    let liveness = HealthRegistry::new("liveness");

    info!(zk_addr = %config.zk_addr, "connecting to cluster metadata backend");
    let metadata = ZkClusterMetadata::connect(&config.zk_addr, config.zk_prefix.clone(), ZK_SESSION_TIMEOUT)
        .await
        .unwrap_or_else(|e| {
            fatal(StartupError::ZooKeeperUnavailable {
                addr: config.zk_addr.clone(),
                source: e,
            })
        });

    let override_store: Arc<dyn OverrideStore> = Arc::new(ZkOverrideStore::new(
        metadata.clone(),
        config.zk_config_prefix.clone(),
    ));

    let kafka_admin = ZkKafkaAdmin::new(metadata.clone());
    let reassignment_view = MetadataReassignmentView::new(metadata.clone());

    let dd_config = DatadogConfig {
        site: config.dd_site.clone(),
        api_key: config.dd_api_key.clone().expect("checked above"),
        app_key: config.dd_app_key.clone().expect("checked above"),
        tx_metric: DEFAULT_TX_METRIC.to_owned(),
        rx_metric: DEFAULT_RX_METRIC.to_owned(),
        broker_tag: DEFAULT_BROKER_TAG.to_owned(),
        instance_type_tag: DEFAULT_INSTANCE_TYPE_TAG.to_owned(),
    };
    let metrics_source = DatadogMetricsSource::new(dd_config);

    let events: Arc<dyn EventSink> = if config.datadog_enabled() {
        Arc::new(DatadogEventSink::new(
            reqwest::Client::new(),
            config.dd_site.clone(),
            config.dd_api_key.clone().expect("checked above"),
            config.dd_event_tags.clone(),
        ))
    } else {
        Arc::new(LoggingEventSink)
    };

    let capacity = CapacityModel::new(cap_map);
    let limits = Limits {
        min_mbps: config.min_rate,
        src_max_pct: config.max_tx_rate,
        dst_max_pct: config.max_rx_rate,
    };
    let reconciler_config = ReconcilerConfig {
        limits,
        change_threshold_pct: config.change_threshold,
        failure_threshold: config.failure_threshold,
        cleanup_after: config.cleanup_after,
        metrics_window: config.metrics_window(),
    };

    let reconciler_health: HealthHandle = liveness
        .register("reconciler".to_owned(), config.interval() * 4)
        .await;

    let shutdown = CancellationToken::new();

    let reconciler = Reconciler::new(
        reassignment_view,
        override_store.clone(),
        metrics_source,
        kafka_admin,
        metadata,
        events,
        capacity,
        reconciler_config,
        reconciler_health,
        shutdown.clone(),
    );

    let app_context = Arc::new(AppContext {
        override_store,
        health: liveness,
    });

    let reconcile_task = tokio::spawn(reconcile_loop(reconciler, config.interval, shutdown.clone()));
    let http_task = tokio::spawn(serve_admin_api(
        app_context,
        config.api_listen.clone(),
        shutdown.clone(),
    ));
    let signal_task = tokio::spawn(wait_for_shutdown_signal(shutdown));

    tokio::select! {
        res = reconcile_task => {
            info!("reconcile loop exited");
            if let Err(e) = res {
                error!("reconcile loop panicked: {}", e);
            }
        }
        res = http_task => {
            info!("admin http server exited");
            match res {
                Ok(Err(e)) => error!("admin http server failed: {}", e),
                Err(e) => error!("admin http server panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    signal_task.abort();
}
