//! Round-trippable model of the promtail configuration
//!
//! Only `scrape_configs` and the pipeline-stage lists inside it are given
//! structure. Every other key (top-level blocks like `server` or `client`,
//! per-job service-discovery and relabel blocks, unknown stage kinds) is an
//! untyped `serde_yaml` value carried verbatim so that a load and dump
//! round-trip preserves it. Comments are not preserved.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::trace;

/// The promtail configuration for one cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromtailConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scrape_configs: Vec<ScrapeConfig>,

    /// Every top-level key other than `scrape_configs`, verbatim.
    #[serde(flatten)]
    pub extra: Mapping,
}

/// One scrape job and its log processing pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub job_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline_stages: Vec<PipelineStage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_sd_configs: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabel_configs: Vec<Value>,

    /// Remaining job-level keys, verbatim.
    #[serde(flatten)]
    pub extra: Mapping,
}

/// A single pipeline stage: a one-key mapping whose key names the stage kind
/// (`drop`, `match`, `cri`, `multiline`, ...).
///
/// The raw mapping is kept as parsed; the drop and sampling operators decode
/// it lazily and leave anything they do not own untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineStage(pub Mapping);

impl PipelineStage {
    /// The stage kind, i.e. the first key of the mapping
    pub fn kind(&self) -> Option<&str> {
        self.0.iter().next().and_then(|(key, _)| key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl PromtailConfig {
    /// Parse the promtail configuration from a YAML string
    pub fn from_yaml(raw: &str) -> Result<Self> {
        trace!("parsing promtail config");
        serde_yaml::from_str(raw).context("failed to parse promtail config")
    }

    /// Serialize the configuration back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        trace!("serializing promtail config");
        serde_yaml::to_string(self).context("failed to serialize promtail config")
    }
}
