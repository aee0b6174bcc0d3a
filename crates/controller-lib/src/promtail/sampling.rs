//! Sampling-stage operations on the promtail pipeline
//!
//! A sampling stage is a `match` stage with `pipeline_name` set to the
//! controller's marker, a selector rendered from the configured format
//! template, and a nested `sampling` stage holding the forward rate as a
//! fraction. The same template is used to render selectors when stages are
//! added and to parse the workload name back out when they are discovered.

use super::config::{PipelineStage, PromtailConfig};
use super::error::StageError;
use crate::models::Percentage;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Marker identifying match stages owned by this controller
pub const SAMPLING_PIPELINE_NAME: &str = "automated_sampling";

/// A selector format template split around its single `%s` placeholder
pub(crate) struct SelectorFormat<'a> {
    prefix: &'a str,
    suffix: &'a str,
}

impl<'a> SelectorFormat<'a> {
    /// Split the template; it must contain exactly one `%s`.
    pub(crate) fn parse(format: &'a str) -> Result<Self, StageError> {
        let Some(idx) = format.find("%s") else {
            return Err(StageError::InvalidSelectorFormat(format.to_string()));
        };
        let (prefix, rest) = format.split_at(idx);
        let suffix = &rest[2..];
        if suffix.contains("%s") {
            return Err(StageError::InvalidSelectorFormat(format.to_string()));
        }
        Ok(Self { prefix, suffix })
    }

    fn render(&self, workload: &str) -> String {
        format!("{}{}{}", self.prefix, workload, self.suffix)
    }

    /// Invert `render`: the workload is the non-empty substring between the
    /// template's prefix and suffix.
    fn workload_of<'s>(&self, selector: &'s str) -> Option<&'s str> {
        let name = selector
            .strip_prefix(self.prefix)?
            .strip_suffix(self.suffix)?;
        (!name.is_empty()).then_some(name)
    }
}

/// Build an owned sampling stage for one workload.
///
/// The percentage must be within `[0, 100]`; promtail stores it as a
/// fraction, so `percentage / 100` lands on disk.
pub(crate) fn new_sampling_stage(
    format: &SelectorFormat<'_>,
    workload: &str,
    percentage: Percentage,
) -> Result<PipelineStage, StageError> {
    if !(0.0..=100.0).contains(&percentage) {
        return Err(StageError::PercentageOutOfRange(percentage));
    }
    if workload.is_empty() {
        return Err(StageError::EmptyWorkload);
    }

    let mut sampling = Mapping::new();
    sampling.insert("rate".into(), (percentage / 100.0).into());

    let mut nested = Mapping::new();
    nested.insert("sampling".into(), Value::Mapping(sampling));

    let mut matcher = Mapping::new();
    matcher.insert("pipeline_name".into(), SAMPLING_PIPELINE_NAME.into());
    matcher.insert("selector".into(), format.render(workload).into());
    matcher.insert("stages".into(), Value::Sequence(vec![Value::Mapping(nested)]));

    let mut stage = Mapping::new();
    stage.insert("match".into(), Value::Mapping(matcher));
    Ok(PipelineStage(stage))
}

/// Recognize an owned sampling stage and invert it to
/// `(workload, percentage)`.
///
/// Anything that is not a match stage carrying the controller's
/// `pipeline_name` marker yields the `NotASamplingStage` sentinel; a marked
/// stage whose body cannot be decoded is a structural error.
pub(crate) fn parse_sampling_stage(
    stage: &PipelineStage,
    format: &SelectorFormat<'_>,
) -> Result<(String, Percentage), StageError> {
    let matcher = match stage.get("match") {
        Some(Value::Mapping(m)) => m,
        _ => return Err(StageError::NotASamplingStage),
    };
    match matcher.get("pipeline_name").and_then(Value::as_str) {
        Some(SAMPLING_PIPELINE_NAME) => {}
        _ => return Err(StageError::NotASamplingStage),
    }

    let selector = matcher
        .get("selector")
        .and_then(Value::as_str)
        .ok_or_else(|| StageError::malformed("match", "selector is missing or not a string"))?;

    let workload = format.workload_of(selector).ok_or_else(|| {
        StageError::malformed(
            "match",
            format!("failed to extract workload from selector {selector:?}"),
        )
    })?;

    let stages = matcher
        .get("stages")
        .and_then(Value::as_sequence)
        .filter(|stages| !stages.is_empty())
        .ok_or_else(|| StageError::malformed("match", "stages missing or empty"))?;

    let rate = stages[0]
        .as_mapping()
        .and_then(|nested| nested.get("sampling"))
        .and_then(Value::as_mapping)
        .ok_or_else(|| StageError::malformed("match", "sampling field not found in stage"))?
        .get("rate")
        .and_then(Value::as_f64)
        .ok_or_else(|| StageError::malformed("match", "sampling rate is not a number"))?;

    Ok((workload.to_string(), rate * 100.0))
}

impl PromtailConfig {
    /// Append one owned sampling stage per `(workload, percentage)` entry to
    /// every scrape job. Entries that fail validation are skipped and logged.
    /// No deduplication happens here; callers clear owned stages first.
    /// Returns whether any stage was added.
    pub fn add_sampling_stages(
        &mut self,
        rates: &BTreeMap<String, Percentage>,
        format: &str,
    ) -> Result<bool, StageError> {
        if rates.is_empty() {
            debug!("no sampling stages to add");
            return Ok(false);
        }
        let format = SelectorFormat::parse(format)?;

        info!(workloads = ?rates, "adding sampling stages");

        let mut updated = false;
        for job in &mut self.scrape_configs {
            for (workload, &percentage) in rates {
                match new_sampling_stage(&format, workload, percentage) {
                    Ok(stage) => {
                        job.pipeline_stages.push(stage);
                        updated = true;
                    }
                    Err(e) => error!(workload = %workload, error = %e, "failed to create sampling stage"),
                }
            }
        }
        Ok(updated)
    }

    /// Remove every owned sampling stage from every job, keeping everything
    /// else in place. A structural error in a marked stage aborts the
    /// operation. Returns whether any stage was removed.
    pub fn remove_all_sampling_stages(&mut self, format: &str) -> Result<bool, StageError> {
        debug!("removing all owned sampling stages");
        let format = SelectorFormat::parse(format)?;

        let mut removed = false;
        for job in &mut self.scrape_configs {
            let mut kept = Vec::with_capacity(job.pipeline_stages.len());
            for stage in &job.pipeline_stages {
                match parse_sampling_stage(stage, &format) {
                    Ok(_) => removed = true,
                    Err(StageError::NotASamplingStage) => kept.push(stage.clone()),
                    Err(e) => {
                        error!(error = %e, "failed to parse sampling stage");
                        return Err(e);
                    }
                }
            }
            job.pipeline_stages = kept;
        }
        Ok(removed)
    }

    /// The workloads currently sampled anywhere in the config, with their
    /// percentages
    pub fn sampled_workloads(
        &self,
        format: &str,
    ) -> Result<BTreeMap<String, Percentage>, StageError> {
        let format = SelectorFormat::parse(format)?;

        let mut sampled = BTreeMap::new();
        for job in &self.scrape_configs {
            for stage in &job.pipeline_stages {
                match parse_sampling_stage(stage, &format) {
                    Ok((workload, percentage)) => {
                        sampled.insert(workload, percentage);
                    }
                    Err(StageError::NotASamplingStage) => {}
                    Err(e) => {
                        error!(error = %e, "failed to parse sampling stage");
                        return Err(e);
                    }
                }
            }
        }
        Ok(sampled)
    }
}
