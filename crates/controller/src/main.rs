//! Log ingestion budget controller
//!
//! Watches how many bytes each workload shipped to the log store over the
//! past day, computes per-workload budgets from CPU requests and static
//! overrides, and rewrites the promtail configuration secret so that
//! over-budget workloads only forward a fraction of their logs.

use anyhow::{Context, Result};
use clap::Parser;
use controller_lib::budget::BudgetCatalog;
use controller_lib::mimir::{MetricNames, MimirClient};
use controller_lib::promtail::PromtailSyntaxChecker;
use controller_lib::secrets::{kube_client, KubeSecretStore};
use controller_lib::{ControllerMetrics, ReconcileSettings, Reconciler, Scheduler};
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

/// Each cycle judges ingestion over the past day
const TIME_RANGE: &str = "24h";

#[derive(Parser, Debug)]
#[command(version, about = "Keeps per-workload log ingestion inside daily budgets")]
struct Options {
    /// Path to the config file (falls back to $CONFIG_FILE)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Port to expose Prometheus metrics on
    #[arg(long = "metrics-port", default_value_t = 9091)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Options::parse();
    let settings = config::Settings::load(opts.config.as_deref())?;
    init_tracing(&settings.log);

    info!(
        cluster = %settings.cluster,
        mode = %settings.mode,
        dry_run = settings.dry_run,
        "starting log-budget-controller"
    );

    // Independent startup tasks run in parallel
    let (catalog, client) = tokio::try_join!(
        load_catalog(settings.budget.config_path.clone()),
        kube_client(settings.kube_config.as_deref().map(Path::new)),
    )?;
    info!("startup initialization completed");

    let querier = MimirClient::new(
        &settings.metrics.mimir_endpoint,
        &settings.metrics.mimir_tenant,
        settings.query_timeout()?,
    )?
    .with_metric_names(metric_names(&settings));

    let store = KubeSecretStore::new(
        client,
        &settings.promtail.secret.namespace,
        &settings.promtail.secret.name,
        &settings.promtail.secret.key,
    );
    let validator = PromtailSyntaxChecker::new(&settings.promtail.local_bin);

    let reconciler = Arc::new(Reconciler::new(
        catalog,
        Arc::new(querier),
        Arc::new(store),
        Arc::new(validator),
        ControllerMetrics::new(),
        ReconcileSettings {
            cluster: settings.cluster.clone(),
            org: settings.budget.org.clone(),
            env: settings.budget.env.clone(),
            multiplier: settings.budget.multiplier,
            minimum: settings.budget.minimum,
            selector_format: settings.promtail.sampling.selector.format.clone(),
            time_range: TIME_RANGE.to_string(),
            dry_run: settings.dry_run,
        },
    ));

    tokio::spawn(api::serve(opts.metrics_port));

    let scheduler = Scheduler::new(
        &settings.scheduling.cron.budget_reset,
        &settings.scheduling.timezone,
        reconciler,
    )?;
    info!(
        budget_reset = %settings.scheduling.cron.budget_reset,
        timezone = %settings.scheduling.timezone,
        "scheduler configured"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        let _ = shutdown_tx.send(());
    });

    scheduler.run(shutdown_rx).await;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(log: &config::Log) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.clone()));

    if log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn load_catalog(path: String) -> Result<BudgetCatalog> {
    tokio::task::spawn_blocking(move || BudgetCatalog::from_file(&path))
        .await
        .context("budget catalog load task failed")?
}

fn metric_names(settings: &config::Settings) -> MetricNames {
    let mut names = MetricNames::default();
    let overrides = &settings.metrics.names;
    if let Some(name) = overrides.get("ingested_bytes") {
        names.ingested_bytes = name.clone();
    }
    if let Some(name) = overrides.get("cpu_request") {
        names.cpu_request = name.clone();
    }
    if let Some(name) = overrides.get("memory_request") {
        names.memory_request = name.clone();
    }
    names
}
