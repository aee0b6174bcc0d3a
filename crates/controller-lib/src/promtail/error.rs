//! Stage-level errors for the promtail config operators

use thiserror::Error;

/// Errors raised while building or recognizing pipeline stages.
///
/// `NotASamplingStage` is a sentinel, not a failure: iteration over a mixed
/// stage list relies on it to pass over foreign stages. `Malformed` is a
/// structural error in the YAML; the remaining variants are contract
/// violations in the caller-supplied inputs.
#[derive(Debug, Error, PartialEq)]
pub enum StageError {
    #[error("not a sampling stage")]
    NotASamplingStage,

    #[error("selector format must contain a single %s placeholder: {0:?}")]
    InvalidSelectorFormat(String),

    #[error("sampling percentage must be within [0, 100], got {0}")]
    PercentageOutOfRange(f64),

    #[error("workload name cannot be empty")]
    EmptyWorkload,

    #[error("malformed {kind} stage: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

impl StageError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}
