//! Drop-stage operations on the promtail pipeline
//!
//! A drop stage belongs to this controller iff `source == "workload"` and
//! `drop_counter_reason == "too_many_logs"`. Drop stages added by operators
//! for other reasons are foreign and preserved verbatim.

use super::config::{PipelineStage, PromtailConfig};
use super::error::StageError;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Reason marker identifying drop stages owned by this controller
pub const DROP_REASON_TOO_MANY_LOGS: &str = "too_many_logs";

/// Source label the controller drops on
pub const DROP_SOURCE_WORKLOAD: &str = "workload";

/// Logical projection of a `drop` pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropStage {
    pub source: String,
    pub drop_counter_reason: String,
    pub value: String,
}

impl DropStage {
    /// Whether this drop stage was produced by the controller
    pub fn is_owned(&self) -> bool {
        self.source == DROP_SOURCE_WORKLOAD && self.drop_counter_reason == DROP_REASON_TOO_MANY_LOGS
    }

    fn into_stage(self) -> PipelineStage {
        let mut body = Mapping::new();
        body.insert("source".into(), self.source.into());
        body.insert("drop_counter_reason".into(), self.drop_counter_reason.into());
        body.insert("value".into(), self.value.into());

        let mut stage = Mapping::new();
        stage.insert("drop".into(), Value::Mapping(body));
        PipelineStage(stage)
    }
}

/// Decode the body of a `drop` stage.
///
/// A missing or non-string `drop_counter_reason` defaults to
/// `"too_many_logs"`; missing `source` or `value` is a structural error.
pub(crate) fn parse_drop_stage(body: &Mapping) -> Result<DropStage, StageError> {
    let source = body
        .get("source")
        .and_then(Value::as_str)
        .ok_or_else(|| StageError::malformed("drop", "source field is missing or not a string"))?;

    let drop_counter_reason = body
        .get("drop_counter_reason")
        .and_then(Value::as_str)
        .unwrap_or(DROP_REASON_TOO_MANY_LOGS);

    let value = body
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| StageError::malformed("drop", "value field is missing or not a string"))?;

    Ok(DropStage {
        source: source.to_string(),
        drop_counter_reason: drop_counter_reason.to_string(),
        value: value.to_string(),
    })
}

/// The drop-stage body of a pipeline stage, if it is a drop stage
fn drop_body(stage: &PipelineStage) -> Option<&Mapping> {
    match stage.get("drop") {
        Some(Value::Mapping(body)) => Some(body),
        _ => None,
    }
}

impl PromtailConfig {
    /// Append one owned drop stage per workload to every scrape job.
    ///
    /// Workloads that already have an owned drop stage somewhere in the
    /// config are skipped. Returns whether the config changed.
    pub fn add_drop_stages(&mut self, workloads: &[String]) -> bool {
        let already_dropped: HashSet<String> = self.dropped_workloads().into_iter().collect();

        let mut updated = false;
        for workload in workloads {
            if already_dropped.contains(workload) {
                debug!(workload = %workload, "logs are already dropped, skipping");
                continue;
            }

            debug!(workload = %workload, "dropping logs");
            let stage = DropStage {
                source: DROP_SOURCE_WORKLOAD.to_string(),
                drop_counter_reason: DROP_REASON_TOO_MANY_LOGS.to_string(),
                value: workload.clone(),
            };
            for job in &mut self.scrape_configs {
                job.pipeline_stages.push(stage.clone().into_stage());
            }
            updated = true;
        }
        updated
    }

    /// Workloads with an owned drop stage anywhere in the config
    pub fn dropped_workloads(&self) -> Vec<String> {
        let mut workloads = Vec::new();
        for job in &self.scrape_configs {
            for stage in &job.pipeline_stages {
                let Some(body) = drop_body(stage) else {
                    continue;
                };
                match parse_drop_stage(body) {
                    Ok(drop) if drop.is_owned() => workloads.push(drop.value),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "skipping unreadable drop stage"),
                }
            }
        }
        workloads
    }

    /// Remove from every job each drop stage matching `(source, value)`,
    /// regardless of its reason marker. Returns whether the config changed.
    pub fn remove_drop_stage(&mut self, source: &str, value: &str) -> bool {
        info!(source, value, "removing drop stage");

        let mut updated = false;
        for job in &mut self.scrape_configs {
            job.pipeline_stages.retain(|stage| {
                let Some(body) = drop_body(stage) else {
                    return true;
                };
                match parse_drop_stage(body) {
                    Ok(drop) if drop.source == source && drop.value == value => {
                        updated = true;
                        false
                    }
                    Ok(_) => true,
                    Err(e) => {
                        warn!(error = %e, "keeping unreadable drop stage");
                        true
                    }
                }
            });
        }
        updated
    }

    /// Remove every owned drop stage from every job; drop stages with a
    /// foreign reason are preserved. Returns whether the config changed.
    pub fn allow_all_logs(&mut self) -> bool {
        debug!("removing all owned drop stages");

        let mut updated = false;
        for job in &mut self.scrape_configs {
            job.pipeline_stages.retain(|stage| {
                let Some(body) = drop_body(stage) else {
                    return true;
                };
                match parse_drop_stage(body) {
                    Ok(drop) if drop.drop_counter_reason == DROP_REASON_TOO_MANY_LOGS => {
                        updated = true;
                        false
                    }
                    Ok(_) => true,
                    Err(e) => {
                        warn!(error = %e, "keeping unreadable drop stage");
                        true
                    }
                }
            });
        }
        updated
    }
}
