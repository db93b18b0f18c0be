//! Solver configuration.
//!
//! `LbfgsOptions` can be built through the `with_*` methods on [`crate::Lbfgs`] or
//! deserialized from any serde format; missing fields take their defaults.

use crate::error::LbfgsError;
use crate::line_search::LineSearchParams;
use serde::{Deserialize, Serialize};

/// Curvature tolerances at or below this value are replaced by [`DEFAULT_GTOL`].
pub const MIN_GTOL: f64 = 1e-4;
pub const DEFAULT_GTOL: f64 = 0.9;
pub const DEFAULT_FTOL: f64 = 1e-4;

/// Controls the per-iteration progress log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    /// Log iteration 1 and then every `every`-th iteration. `None` keeps the
    /// progress log quiet; termination is always logged.
    pub every: Option<usize>,
    /// Also log the current point and gradient at debug level.
    pub vectors: bool,
}

impl ReportOptions {
    pub(crate) fn wants(&self, iteration: usize) -> bool {
        match self.every {
            Some(0) | None => false,
            Some(k) => iteration == 1 || iteration % k == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsOptions {
    /// Number of correction pairs kept in the history (`m`).
    pub corrections: usize,
    /// Convergence is declared when `||g|| / max(1, ||x||) <= tolerance`.
    pub tolerance: f64,
    /// Sufficient decrease tolerance of the line search.
    pub ftol: f64,
    /// Curvature tolerance of the line search. Must exceed `ftol`.
    pub gtol: f64,
    /// Relative width of the interval of uncertainty below which the line search gives up.
    pub xtol: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Function evaluations allowed per line search.
    pub max_evaluations_per_search: usize,
    /// Ask the objective for a diagonal inverse Hessian estimate every iteration
    /// instead of using the scalar `yᵀs / yᵀy`.
    pub use_caller_diagonal: bool,
    /// Optional cap on outer iterations. Unlimited by default.
    pub max_iterations: Option<usize>,
    pub report: ReportOptions,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            corrections: 3,
            tolerance: 1e-6,
            ftol: DEFAULT_FTOL,
            gtol: DEFAULT_GTOL,
            xtol: f64::EPSILON,
            min_step: 1e-20,
            max_step: 1e20,
            max_evaluations_per_search: 20,
            use_caller_diagonal: false,
            max_iterations: None,
            report: ReportOptions::default(),
        }
    }
}

impl LbfgsOptions {
    /// Checks the options against a problem of dimension `n`.
    ///
    /// Returns the options actually used. A curvature tolerance at or below
    /// [`MIN_GTOL`] is replaced by [`DEFAULT_GTOL`] with a warning rather than
    /// rejected; every other violation is an [`LbfgsError::ImproperInput`].
    pub fn validated(&self, n: usize) -> Result<LbfgsOptions, LbfgsError> {
        let mut opts = self.clone();
        if n == 0 {
            return Err(LbfgsError::improper("the problem dimension must be positive"));
        }
        if opts.corrections == 0 {
            return Err(LbfgsError::improper(
                "the number of stored corrections must be positive",
            ));
        }
        if !(opts.tolerance >= 0.0) {
            return Err(LbfgsError::improper(format!(
                "the convergence tolerance must be non-negative, got {}",
                opts.tolerance
            )));
        }
        if !(opts.ftol >= 0.0) {
            return Err(LbfgsError::improper(format!(
                "ftol must be non-negative, got {}",
                opts.ftol
            )));
        }
        if opts.gtol <= MIN_GTOL {
            log::warn!(
                "[L-BFGS] gtol = {:e} is not larger than {:e}; resetting gtol to {}",
                opts.gtol,
                MIN_GTOL,
                DEFAULT_GTOL
            );
            opts.gtol = DEFAULT_GTOL;
        }
        if opts.gtol <= opts.ftol {
            return Err(LbfgsError::improper(format!(
                "gtol ({}) must exceed ftol ({})",
                opts.gtol, opts.ftol
            )));
        }
        opts.line_search_params().validate()?;
        Ok(opts)
    }

    pub(crate) fn line_search_params(&self) -> LineSearchParams {
        LineSearchParams {
            ftol: self.ftol,
            gtol: self.gtol,
            xtol: self.xtol,
            min_step: self.min_step,
            max_step: self.max_step,
            max_evaluations: self.max_evaluations_per_search,
        }
    }
}
