//! Observability infrastructure for the controller
//!
//! Provides the process-global Prometheus metrics: cycle outcomes and the
//! per-workload sampling info gauge.

use prometheus::{register_gauge_vec, register_int_counter_vec, GaugeVec, IntCounterVec};
use std::sync::OnceLock;

/// Global prefix for all controller metrics
const METRICS_PREFIX: &str = "log_budget_controller_";

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ControllerMetricsInner {
    task_executions: IntCounterVec,
    sampling_info: GaugeVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            task_executions: register_int_counter_vec!(
                format!("{METRICS_PREFIX}task_executions_total"),
                "Total number of budget reconciliation cycles by outcome",
                &["status"]
            )
            .expect("Failed to register task_executions_total"),

            sampling_info: register_gauge_vec!(
                format!("{METRICS_PREFIX}log_sampling_info"),
                "Current ingestion, daily budget and sampling percentage per sampled workload",
                &["workload", "cluster", "metric_type"]
            )
            .expect("Failed to register log_sampling_info"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the outcome of one reconciliation cycle
    pub fn record_task_execution(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.inner().task_executions.with_label_values(&[status]).inc();
    }

    /// Record the sampling decision for one over-budget workload
    pub fn record_sampling(
        &self,
        workload: &str,
        cluster: &str,
        current_ingestion: f64,
        budget: f64,
        sampling_percentage: f64,
    ) {
        let gauges = &self.inner().sampling_info;
        gauges
            .with_label_values(&[workload, cluster, "current_ingestion"])
            .set(current_ingestion);
        gauges
            .with_label_values(&[workload, cluster, "daily_budget"])
            .set(budget);
        gauges
            .with_label_values(&[workload, cluster, "sampling_percentage"])
            .set(sampling_percentage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle() {
        let metrics = ControllerMetrics::new();

        metrics.record_task_execution(true);
        metrics.record_task_execution(false);
        metrics.record_sampling("api-gateway", "cluster-001", 2.0, 1.0, 50.0);
    }
}
