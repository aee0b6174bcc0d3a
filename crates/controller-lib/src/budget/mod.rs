//! Budget catalog and sizing engine
//!
//! The catalog holds static per-workload budget overrides from the budget
//! document; the sizing engine turns resource requests into effective daily
//! budgets, detects over-budget workloads and derives sampling percentages.

mod catalog;
mod sizing;


pub use catalog::BudgetCatalog;
pub use sizing::{dynamic_budgets, over_budget_workloads, sampling_rates};
