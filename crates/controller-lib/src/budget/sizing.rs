//! Effective budget computation, over-budget detection and sampling rates

use crate::models::{
    GigaBytes, OverBudgetWorkload, Percentage, WorkloadIngestedBytes, WorkloadResourceRequest,
    BYTES_PER_GIGABYTE,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Core count of a standard node; a workload requesting a full node of CPU
/// gets the baseline multiplier as its budget.
const STANDARD_NODE_CORES: f64 = 16.0;

/// Sampling percentages are clamped to this range. The lower bound keeps a
/// trickle of logs flowing even for extreme overshoots.
const MIN_SAMPLING_PERCENTAGE: f64 = 1.0;
const MAX_SAMPLING_PERCENTAGE: f64 = 100.0;

/// Compute the effective daily budget per workload.
///
/// The CPU-scaled baseline is floored to `minimum`; a static override from
/// the budget document replaces the computed value entirely and is not
/// re-floored. Workloads without resource data are absent from the result.
pub fn dynamic_budgets(
    resources: &[WorkloadResourceRequest],
    overrides: &BTreeMap<String, GigaBytes>,
    multiplier: f64,
    minimum: GigaBytes,
) -> BTreeMap<String, GigaBytes> {
    debug!(
        workloads = resources.len(),
        overrides = overrides.len(),
        "calculating dynamic budgets"
    );

    let mut budgets = BTreeMap::new();
    for w in resources {
        let mut b = w.cpu / STANDARD_NODE_CORES * multiplier;
        if b < minimum {
            b = minimum;
        }
        if let Some(&override_gb) = overrides.get(&w.workload) {
            b = override_gb;
        }
        budgets.insert(w.workload.clone(), b);
    }
    budgets
}

/// Find workloads whose ingestion over the query range exceeds their budget.
///
/// Workloads without a budget entry, or with a zero budget, are skipped.
pub fn over_budget_workloads(
    ingested: &[WorkloadIngestedBytes],
    budgets: &BTreeMap<String, GigaBytes>,
) -> Vec<OverBudgetWorkload> {
    let mut offenders = Vec::new();
    for w in ingested {
        let budget = match budgets.get(&w.workload) {
            Some(&b) if b != 0.0 => b,
            _ => continue,
        };

        let current_gb = w.value / BYTES_PER_GIGABYTE;
        if current_gb > budget {
            offenders.push(OverBudgetWorkload {
                cluster: w.cluster.clone(),
                workload: w.workload.clone(),
                budget,
                current_ingestion: current_gb,
            });
        }
    }
    offenders
}

/// Derive the sampling percentage per over-budget workload.
///
/// `budget / current * 100` keeps expected ingestion at the budget when
/// applied forward; the result is clamped to `[1, 100]`. A `BTreeMap` keeps
/// the subsequent stage rewrite deterministic.
pub fn sampling_rates(offenders: &[OverBudgetWorkload]) -> BTreeMap<String, Percentage> {
    let mut rates = BTreeMap::new();
    for w in offenders {
        let percentage = (w.budget / w.current_ingestion * 100.0)
            .clamp(MIN_SAMPLING_PERCENTAGE, MAX_SAMPLING_PERCENTAGE);

        info!(
            workload = %w.workload,
            budget_gb = w.budget,
            usage_gb = w.current_ingestion,
            usage_vs_budget_ratio = w.current_ingestion / w.budget,
            sampling_percentage = percentage,
            "calculated sampling rate for workload"
        );

        rates.insert(w.workload.clone(), percentage);
    }
    rates
}
