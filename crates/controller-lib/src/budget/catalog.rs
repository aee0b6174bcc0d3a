//! Budget document parsing and lookup

use crate::models::GigaBytes;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// The budget document: per-(org, env) workload budget overrides.
/// Immutable after load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetCatalog {
    #[serde(default)]
    orgs: Vec<Organization>,
}

#[derive(Debug, Clone, Deserialize)]
struct Organization {
    name: String,
    #[serde(default)]
    envs: Vec<Environment>,
}

#[derive(Debug, Clone, Deserialize)]
struct Environment {
    name: String,
    #[serde(default)]
    workloads: Vec<WorkloadBudget>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkloadBudget {
    name: String,
    daily_ingestion_budget: i64,
}

impl BudgetCatalog {
    /// Load the budget document from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read budget document {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    /// Parse the budget document from a YAML string
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("failed to parse budget document")
    }

    /// Budget overrides for one (org, env) pair.
    ///
    /// A missing org or env yields an empty map: no overrides, not an error.
    /// Duplicate workload entries under the same env resolve to the last one.
    pub fn budgets_for(&self, org: &str, env: &str) -> BTreeMap<String, GigaBytes> {
        debug!(org, env, "extracting budget overrides");

        let mut budgets = BTreeMap::new();
        for o in self.orgs.iter().filter(|o| o.name == org) {
            for e in o.envs.iter().filter(|e| e.name == env) {
                for workload in &e.workloads {
                    budgets.insert(
                        workload.name.clone(),
                        workload.daily_ingestion_budget as GigaBytes,
                    );
                }
            }
        }
        budgets
    }
}
