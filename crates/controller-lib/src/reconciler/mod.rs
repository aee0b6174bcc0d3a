//! The reconciliation cycle
//!
//! One cycle collects budgets and metrics, sizes effective budgets, detects
//! over-budget workloads, rewrites the promtail sampling stages accordingly,
//! validates the result and persists it back into the cluster secret. Either
//! the validated config reaches the secret or nothing changes.


use crate::budget::{self, BudgetCatalog};
use crate::mimir::MetricsQuerier;
use crate::models::GigaBytes;
use crate::observability::ControllerMetrics;
use crate::promtail::{ConfigValidator, PromtailConfig};
use crate::secrets::SecretStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Per-cycle parameters, fixed at startup
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub cluster: String,
    pub org: String,
    pub env: String,
    pub multiplier: f64,
    pub minimum: GigaBytes,
    pub selector_format: String,
    pub time_range: String,
    pub dry_run: bool,
}

/// Orchestrates one budget reconciliation cycle end to end
pub struct Reconciler {
    catalog: BudgetCatalog,
    querier: Arc<dyn MetricsQuerier>,
    secrets: Arc<dyn SecretStore>,
    validator: Arc<dyn ConfigValidator>,
    metrics: ControllerMetrics,
    settings: ReconcileSettings,
    /// Cycles never overlap; a tick that fires mid-cycle waits here.
    cycle_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        catalog: BudgetCatalog,
        querier: Arc<dyn MetricsQuerier>,
        secrets: Arc<dyn SecretStore>,
        validator: Arc<dyn ConfigValidator>,
        metrics: ControllerMetrics,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            catalog,
            querier,
            secrets,
            validator,
            metrics,
            settings,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one cycle and record its outcome. Never panics and never
    /// propagates cycle errors to the caller.
    pub async fn run_cycle(&self) {
        let _cycle = self.cycle_lock.lock().await;

        debug!("starting budget check and sampling adjustment");
        match self.cycle().await {
            Ok(()) => {
                self.metrics.record_task_execution(true);
                info!("budget check and sampling adjustment completed");
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "budget cycle failed");
                self.metrics.record_task_execution(false);
            }
        }
    }

    async fn cycle(&self) -> Result<()> {
        let settings = &self.settings;

        // Collect budgets and both metric series in parallel; any failure
        // aborts the cycle, but only after all collectors have finished.
        let (overrides, ingested, resources) = tokio::join!(
            async { self.catalog.budgets_for(&settings.org, &settings.env) },
            self.querier.ingested_bytes(&settings.cluster, &settings.time_range),
            self.querier.resource_requests(&settings.cluster, &settings.time_range),
        );
        let ingested = ingested.context("failed to get current ingestion")?;
        let resources = resources.context("failed to get resource requests")?;

        let budgets =
            budget::dynamic_budgets(&resources, &overrides, settings.multiplier, settings.minimum);
        let offenders = budget::over_budget_workloads(&ingested, &budgets);
        if offenders.is_empty() {
            info!("no workloads are currently over budget");
        } else {
            info!(count = offenders.len(), "found workloads over budget");
        }

        let rates = budget::sampling_rates(&offenders);
        for offender in &offenders {
            if let Some(&percentage) = rates.get(&offender.workload) {
                self.metrics.record_sampling(
                    &offender.workload,
                    &offender.cluster,
                    offender.current_ingestion,
                    offender.budget,
                    percentage,
                );
            }
        }

        let raw = self
            .secrets
            .fetch()
            .await
            .context("failed to fetch promtail config")?;
        let mut config =
            PromtailConfig::from_yaml(&raw).context("failed to parse promtail config")?;

        // Advisory only: knowing what was sampled before helps operators
        // trace rate changes, but a read failure must not stop the rewrite.
        match config.sampled_workloads(&settings.selector_format) {
            Ok(sampled) if sampled.is_empty() => info!("there are no previously sampled workloads"),
            Ok(sampled) => info!(
                workloads = ?sampled.keys().collect::<Vec<_>>(),
                "resetting sampling for previously sampled workloads"
            ),
            Err(e) => warn!(error = %e, "failed to get current sampled workloads"),
        }

        config
            .remove_all_sampling_stages(&settings.selector_format)
            .context("failed to remove existing sampling stages")?;
        config
            .add_sampling_stages(&rates, &settings.selector_format)
            .context("failed to add sampling stages")?;

        let rendered = config.to_yaml()?;
        self.validator
            .validate(&rendered)
            .await
            .context("promtail config validation failed")?;

        self.secrets
            .update(&rendered, settings.dry_run)
            .await
            .context("failed to update promtail config secret")?;

        debug!("updated promtail configuration with new sampling rates");
        Ok(())
    }
}
