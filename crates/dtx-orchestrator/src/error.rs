//! Error types for the orchestration layer
//!
//! Three levels, from the inside out:
//! - [`PoolError`] and [`StageError`]: a unit of work did not finish inside the pool
//! - [`BreakerError`]: a dependency call was refused or failed behind its breaker
//! - [`TaskError`] / [`PipelineError`]: what callers of the coordinator see
//!
//! A failed extraction category is not an error at this level; it is
//! recorded as a [`CategoryFailure`] on the task result.

use dtx_aggregate::AggregationError;
use dtx_core::{Classify, CoreError, FailureKind, PipelineStage, TokenCategory};
use dtx_extract::ExtractionError;
use dtx_preprocess::PreprocessError;
use dtx_validate::ValidationError;
use serde::Serialize;
use std::time::Duration;

/// Agent pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Work exceeded the stage timeout and was abandoned
    #[error("{stage} work timed out after {after:?}")]
    Timeout { stage: PipelineStage, after: Duration },

    /// Pool no longer admits work
    #[error("agent pool closed")]
    Closed,
}

impl Classify for PoolError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            PoolError::Timeout { .. } => FailureKind::Timeout,
            PoolError::Closed => FailureKind::Cancelled,
        }
    }
}

/// Outcome of a unit of work that ran through the pool
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError<E> {
    /// The pool gave up on the work
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The work itself failed
    #[error("{0}")]
    Work(E),
}

impl<E: Classify> Classify for StageError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            StageError::Pool(err) => err.failure_kind(),
            StageError::Work(err) => err.failure_kind(),
        }
    }
}

/// Outcome of a call guarded by a circuit breaker
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BreakerError<E> {
    /// Call short-circuited; the dependency was not contacted
    #[error("circuit open for {dependency}")]
    Open { dependency: String },

    /// Call went through and failed
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the call was refused without reaching the dependency
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            BreakerError::Open { .. } => FailureKind::Unavailable,
            BreakerError::Inner(err) => err.failure_kind(),
        }
    }
}

/// Extraction of one category did not produce candidates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryFailure {
    pub category: TokenCategory,
    /// False when a breaker refused the call
    pub attempted: bool,
    pub kind: FailureKind,
    pub message: String,
}

impl CategoryFailure {
    pub(crate) fn from_extraction(
        category: TokenCategory,
        err: &BreakerError<StageError<ExtractionError>>,
    ) -> Self {
        Self {
            category,
            attempted: !err.is_open(),
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

/// Fatal failure of one task
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Task requested nothing to extract
    #[error("task requests no token categories")]
    NoCategories,

    /// Image could not be admitted, fetched, verified or enhanced
    #[error("preprocessing failed at {stage}: {source}")]
    Preprocess {
        stage: &'static str,
        #[source]
        source: PreprocessError,
    },

    /// Every requested category failed or was refused
    #[error("no category could be extracted ({} failed)", .0.len())]
    AllCategoriesFailed(Vec<CategoryFailure>),

    /// Candidates could not be merged
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    /// Merged tokens could not be scored
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A breaker refused a stage the task cannot do without
    #[error("circuit open for {dependency}")]
    BreakerOpen { dependency: String },

    /// The pool abandoned a stage
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl TaskError {
    /// Failure kind for logging and reporting
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::NoCategories => FailureKind::Rejected,
            TaskError::Preprocess { source, .. } => source.failure_kind(),
            TaskError::AllCategoriesFailed(failures) => failures
                .iter()
                .map(|f| f.kind)
                .find(|kind| *kind != FailureKind::Unavailable)
                .unwrap_or(FailureKind::Unavailable),
            TaskError::Aggregation(err) => err.failure_kind(),
            TaskError::Validation(err) => err.failure_kind(),
            TaskError::BreakerOpen { .. } => FailureKind::Unavailable,
            TaskError::Pool(err) => err.failure_kind(),
        }
    }

    pub(crate) fn from_preprocess(err: BreakerError<StageError<PreprocessError>>) -> Self {
        match err {
            BreakerError::Open { dependency } => TaskError::BreakerOpen { dependency },
            BreakerError::Inner(StageError::Pool(err)) => TaskError::Pool(err),
            BreakerError::Inner(StageError::Work(source)) => TaskError::Preprocess {
                stage: source.stage(),
                source,
            },
        }
    }
}

/// Serialisable summary of a [`TaskError`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Per-category detail when every category failed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategoryFailure>,
}

impl From<&TaskError> for TaskFailure {
    fn from(err: &TaskError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            categories: match err {
                TaskError::AllCategoriesFailed(failures) => failures.clone(),
                _ => Vec::new(),
            },
        }
    }
}

impl<E: Into<TaskError>> From<StageError<E>> for TaskError {
    fn from(err: StageError<E>) -> Self {
        match err {
            StageError::Pool(err) => TaskError::Pool(err),
            StageError::Work(err) => err.into(),
        }
    }
}

/// Coordinator-level errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// Extraction agent could not be built
    #[error("extraction setup failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Session contained no tasks
    #[error("session has no tasks")]
    EmptySession,

    /// Every task of a session failed
    #[error("all {} session tasks failed", .0.len())]
    SessionFailed(Vec<TaskError>),

    /// Shared stage of a session failed
    #[error(transparent)]
    Task(#[from] TaskError),
}
