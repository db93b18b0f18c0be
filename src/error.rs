//! Error types returned by the solver and by the line search.

use crate::solver::LbfgsSolution;
use std::fmt;

/// Boxed error produced by a fallible objective.
pub type ObjectiveError = Box<dyn std::error::Error + Send + Sync>;

/// Which end of the admissible step range a failed line search got stuck on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepBound {
    Min,
    Max,
}

impl fmt::Display for StepBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepBound::Min => f.write_str("minimum"),
            StepBound::Max => f.write_str("maximum"),
        }
    }
}

/// Reasons a single More-Thuente line search can terminate without an acceptable step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineSearchError {
    #[error("improper line search input: {reason}")]
    ImproperInput { reason: &'static str },
    #[error("the search direction is not a descent direction (gᵀs = {slope:.3e} >= 0)")]
    NotADescentDirection { slope: f64 },
    #[error(
        "rounding errors prevent further progress at step {step:.3e}; there may not be a step which satisfies the sufficient decrease and curvature conditions"
    )]
    RoundingError { step: f64 },
    #[error(
        "the interval of uncertainty shrank to {width:.3e} at step {step:.3e} without satisfying the sufficient decrease and curvature conditions"
    )]
    Stalled { step: f64, width: f64 },
    #[error("the line search used all {evaluations} function evaluations")]
    MaxEvaluationsExceeded { evaluations: usize },
    #[error("the step is pinned at the {bound} step {step:.3e}")]
    StepPinnedAtBound { bound: StepBound, step: f64 },
}

/// An error type for clear diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum LbfgsError {
    #[error("improper input: {reason}")]
    ImproperInput { reason: String },
    #[error("the diagonal inverse Hessian estimate is not positive at index {index} (value {value:.3e})")]
    NonPositiveDiagonal { index: usize, value: f64 },
    #[error(
        "the search direction is not a descent direction (gᵀs = {slope:.3e} >= 0); the gradient may be inconsistent with the objective"
    )]
    NotADescentDirection { slope: f64 },
    #[error("the line search failed: {0}")]
    LineSearchFailed(LineSearchError),
    #[error("{what} has length {found}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("the gradient norm was NaN or infinity at iteration {iteration}")]
    NonFiniteGradient { iteration: usize },
    #[error("the objective failed to evaluate: {0}")]
    Objective(#[source] ObjectiveError),
    #[error(
        "maximum number of iterations reached without converging; the last accepted point is returned"
    )]
    MaxIterationsReached {
        /// The last accepted iterate.
        last_solution: Box<LbfgsSolution>,
    },
}

impl LbfgsError {
    pub(crate) fn improper(reason: impl Into<String>) -> Self {
        LbfgsError::ImproperInput {
            reason: reason.into(),
        }
    }
}

// Input problems keep their top-level identity; everything else is a failed search.
impl From<LineSearchError> for LbfgsError {
    fn from(err: LineSearchError) -> Self {
        match err {
            LineSearchError::ImproperInput { reason } => LbfgsError::improper(reason),
            LineSearchError::NotADescentDirection { slope } => {
                LbfgsError::NotADescentDirection { slope }
            }
            other => LbfgsError::LineSearchFailed(other),
        }
    }
}
