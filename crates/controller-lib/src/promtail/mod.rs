//! Promtail configuration rewriting
//!
//! This module provides:
//! - A round-trippable model of the promtail YAML (`PromtailConfig`)
//! - The drop-stage operator (suppressing a workload's logs entirely)
//! - The sampling-stage operator (forwarding a fraction of a workload's logs)
//! - Syntax validation through the promtail binary
//!
//! Pipeline stages the controller did not create are foreign: they are
//! carried verbatim and never rewritten. Ownership is decided by the
//! `drop_counter_reason` marker for drop stages and the `pipeline_name`
//! marker for match stages.

mod config;
mod drop;
mod error;
mod sampling;
mod validate;


pub use config::{PipelineStage, PromtailConfig, ScrapeConfig};
pub use drop::{DropStage, DROP_REASON_TOO_MANY_LOGS, DROP_SOURCE_WORKLOAD};
pub use error::StageError;
pub use sampling::SAMPLING_PIPELINE_NAME;
pub use validate::{ConfigValidator, PromtailSyntaxChecker};
