//! Core library for the log ingestion budget controller
//!
//! This crate provides the building blocks for keeping per-workload log
//! ingestion inside daily budgets:
//! - Budget catalog and dynamic budget sizing
//! - Mimir metrics queries (ingested bytes, resource requests)
//! - Promtail pipeline-stage rewriting (sampling and drop stages)
//! - Kubernetes secret persistence
//! - The reconciliation cycle and its cron scheduler
//! - Prometheus observability

pub mod budget;
pub mod mimir;
pub mod models;
pub mod observability;
pub mod promtail;
pub mod reconciler;
pub mod scheduler;
pub mod secrets;

pub use models::*;
pub use observability::ControllerMetrics;
pub use reconciler::{ReconcileSettings, Reconciler};
pub use scheduler::Scheduler;
