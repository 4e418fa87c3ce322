//! AIRRA daemon: wire up the pipeline, spawn the worker loops, serve the
//! operator API, and shut down cleanly on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use airra::actions::KNOWN_PREDICATES;
use airra::approval::{run_sla_sweeper, DailyCounters};
use airra::config::{self, defaults, Settings};
use airra::correlation::Correlator;
use airra::dedup::DedupTable;
use airra::execution::{Executor, HttpEffector, Verifier};
use airra::graph::{DependencyGraph, GraphHandle};
use airra::learning::{run_outcome_flusher, LearningStore};
use airra::perception::{
    run_perception_loop, AnomalyDetector, HttpLogBackend, HttpMetricsBackend, LogBackend,
    MetricsBackend, PerceptionConfig,
};
use airra::pipeline::{run_ingest_loop, PipelineContext, PipelineStats};
use airra::reasoning::{HttpReasoningBackend, ReasoningAdapter, ResponseCache};
use airra::registry::{watch_registry, RegistryEvent};
use airra::runbook::{RunbookHandle, RunbookSet};
use airra::store::MemoryStore;

#[derive(Debug, Parser)]
#[command(name = "airra", about = "Closed-loop incident response control plane")]
struct Args {
    /// Dependency graph YAML (overrides AIRRA_DEPENDENCY_CONFIG).
    #[arg(long, env = "AIRRA_DEPENDENCY_CONFIG")]
    dependency_config: Option<std::path::PathBuf>,

    /// Runbooks YAML (overrides AIRRA_RUNBOOKS_CONFIG).
    #[arg(long, env = "AIRRA_RUNBOOKS_CONFIG")]
    runbooks_config: Option<std::path::PathBuf>,

    /// Operator API listen address.
    #[arg(long, env = "AIRRA_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Data directory for sled state and the learning store.
    #[arg(long, env = "AIRRA_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env().context("loading settings")?;
    if let Some(path) = args.dependency_config {
        settings.dependency_config = path;
    }
    if let Some(path) = args.runbooks_config {
        settings.runbooks_config = path;
    }
    if let Some(addr) = args.listen_addr {
        settings.listen_addr = addr;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    config::init(settings.clone());

    info!(
        dry_run = settings.dry_run_mode,
        metrics = %settings.metrics_url,
        effector = %settings.effector_url,
        "AIRRA starting"
    );

    // Registries: fatal on first load, previous-snapshot-preserving afterwards.
    let graph = GraphHandle::new(
        DependencyGraph::load(&settings.dependency_config).context("loading dependency graph")?,
    );
    let runbooks = RunbookHandle::new(
        RunbookSet::load(&settings.runbooks_config, KNOWN_PREDICATES)
            .context("loading runbooks")?,
    );
    info!(
        graph_hash = graph.snapshot().snapshot_hash(),
        runbook_hash = runbooks.snapshot().snapshot_hash(),
        "registries loaded"
    );

    // Local operational state.
    std::fs::create_dir_all(&settings.data_dir).context("creating data dir")?;
    let db = sled::open(settings.data_dir.join("state")).context("opening sled state")?;
    let counters = Arc::new(DailyCounters::open(&db).context("opening daily counters")?);
    let learning =
        Arc::new(LearningStore::open(&settings.data_dir.join("learning")).context("learning store")?);

    // Outbound clients.
    let metrics: Arc<dyn MetricsBackend> = Arc::new(HttpMetricsBackend::new(
        &settings.metrics_url,
        settings.metrics_query_timeout,
    )?);
    let logs: Option<Arc<dyn LogBackend>> = match settings.logs_url.as_deref() {
        Some(url) => Some(Arc::new(HttpLogBackend::new(
            url,
            settings.metrics_query_timeout,
        )?)),
        None => None,
    };
    let reasoning = Arc::new(ReasoningAdapter::new(
        Arc::new(HttpReasoningBackend::new(
            &settings.reasoning_url,
            &settings.reasoning_api_key,
        )?),
        Some(ResponseCache::open(
            &db,
            Duration::from_secs(defaults::REASONING_CACHE_TTL_SECONDS),
        )?),
        settings.reasoning_model.clone(),
        settings.reasoning_temperature,
        settings.reasoning_timeout,
    ));
    let executor = Arc::new(Executor::new(
        Arc::new(HttpEffector::new(
            &settings.effector_url,
            Duration::from_secs(defaults::EFFECTOR_TIMEOUT_SECONDS),
        )?),
        Verifier::new(
            metrics.clone(),
            settings.stabilization_window,
            settings.improvement_threshold,
            settings.unstable_threshold,
        ),
    ));

    let cancel = CancellationToken::new();
    let ctx = PipelineContext {
        store: Arc::new(MemoryStore::new()),
        learning: learning.clone(),
        graph: graph.clone(),
        runbooks: runbooks.clone(),
        counters: counters.clone(),
        reasoning,
        executor,
        metrics: metrics.clone(),
        dedup: Arc::new(DedupTable::new(
            settings.dedup_window,
            settings.dedup_max_entries,
            &settings.volatile_label_pattern,
        )?),
        stats: Arc::new(PipelineStats::default()),
        analysis_permits: Arc::new(tokio::sync::Semaphore::new(settings.worker_concurrency)),
        cancel: cancel.clone(),
    };

    // Signal path: perception loops -> dedup/correlation ingest.
    let (signal_tx, signal_rx) = mpsc::channel(1024);
    let detector = AnomalyDetector::new(settings.anomaly_threshold_sigma);
    let graph_snapshot = graph.snapshot();
    for service in graph_snapshot.services() {
        let cfg = PerceptionConfig {
            service: service.to_string(),
            metrics: settings.monitored_metrics.clone(),
            poll_interval: settings.poll_interval,
            baseline_points: settings.baseline_window_points,
            detector,
        };
        tokio::spawn(run_perception_loop(
            cfg,
            metrics.clone(),
            logs.clone(),
            signal_tx.clone(),
            cancel.clone(),
        ));
    }
    drop(signal_tx);

    let correlator = Correlator::new(
        settings.correlation_window,
        settings.min_signal_count,
        settings.min_signal_type_diversity,
    );
    tokio::spawn(run_ingest_loop(ctx.clone(), correlator, signal_rx));

    // Scheduled loops: SLA sweeper and outcome flusher.
    tokio::spawn(run_sla_sweeper(
        ctx.store.clone(),
        settings.approval_sla,
        Duration::from_secs(defaults::SLA_SWEEP_INTERVAL_SECONDS),
        cancel.clone(),
    ));
    tokio::spawn(run_outcome_flusher(learning.clone(), cancel.clone()));

    // Registry watchers: atomic snapshot swap on change, keep-previous on error.
    let (registry_tx, mut registry_rx) = mpsc::channel(16);
    {
        let graph = graph.clone();
        tokio::spawn(watch_registry(
            "dependencies",
            settings.dependency_config.clone(),
            cancel.clone(),
            registry_tx.clone(),
            move |path| {
                let fresh = DependencyGraph::load(path)?;
                let hash = fresh.snapshot_hash().to_string();
                graph.swap(fresh);
                Ok(hash)
            },
        ));
    }
    {
        let runbooks = runbooks.clone();
        tokio::spawn(watch_registry(
            "runbooks",
            settings.runbooks_config.clone(),
            cancel.clone(),
            registry_tx,
            move |path| {
                let fresh = RunbookSet::load(path, KNOWN_PREDICATES)?;
                let hash = fresh.snapshot_hash().to_string();
                runbooks.swap(fresh);
                Ok(hash)
            },
        ));
    }
    tokio::spawn(async move {
        while let Some(event) = registry_rx.recv().await {
            if let RegistryEvent::Error { name, message } = event {
                warn!(registry = name, message, "registry reload rejected");
            }
        }
    });

    // Operator API with graceful shutdown.
    let app = airra::api::api_routes(ctx.clone());
    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("binding {}", settings.listen_addr))?;
    info!(addr = %settings.listen_addr, "operator API listening");

    let shutdown_cancel = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_cancel.cancel();
    });
    server.await.context("serving operator API")?;

    // Drain: final flush and counter persistence.
    learning.flush();
    counters.persist();
    info!(stats = %ctx.stats.snapshot(), "AIRRA stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
