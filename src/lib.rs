//! An implementation of the limited-memory BFGS (L-BFGS) optimization algorithm.
//!
//! This crate minimizes smooth unconstrained functions using only values and
//! gradients. The inverse Hessian is never stored; it is applied implicitly
//! through the two-loop recursion over the `m` most recent correction pairs, so
//! memory and work per iteration are O(n·m).
//!
//! # Features
//! - More-Thuente line search with safeguarded cubic/quadratic interpolation and
//!   guaranteed sufficient decrease, available on its own as a resumable state
//!   machine ([`LineSearch`]) that asks the caller for each evaluation.
//! - Scalar `yᵀs / yᵀy` initial scaling, or a caller-supplied diagonal inverse
//!   Hessian estimate through [`WithDiagonal`].
//! - Fallible objectives via [`Fallible`]; their errors are returned unchanged.
//! - Options configurable through a builder or deserialized with serde.
//! - Progress through the `log` facade and an optional per-iteration callback.
//!
//! ## Defaults (key settings)
//! - `m = 3` correction pairs, convergence at `||g|| / max(1, ||x||) <= 1e-6`.
//! - Line search: `ftol = 1e-4`, `gtol = 0.9`, steps in `[1e-20, 1e20]`, 20
//!   evaluations per search.
//! - No cap on outer iterations unless `with_max_iterations` is set.
//!
//! # Example
//!
//! Minimize the Rosenbrock function, a classic test case for optimization algorithms.
//!
//! ```
//! use lbfgs_mcsrch::{Lbfgs, LbfgsSolution};
//! use ndarray::{array, Array1};
//!
//! // Define the Rosenbrock function and its gradient.
//! let rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let a = 1.0;
//!     let b = 100.0;
//!     let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
//!         2.0 * b * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let LbfgsSolution {
//!     final_point: x_min,
//!     final_value,
//!     iterations,
//!     ..
//! } = Lbfgs::new(array![-1.2, 1.0], rosenbrock)
//!     .with_corrections(5)
//!     .with_tolerance(1e-6)
//!     .run()
//!     .expect("L-BFGS failed to solve");
//!
//! println!(
//!     "Found minimum f({}) = {:.4} in {} iterations.",
//!     x_min, final_value, iterations
//! );
//!
//! // The known minimum is at [1.0, 1.0].
//! assert!((x_min[0] - 1.0).abs() < 1e-4);
//! assert!((x_min[1] - 1.0).abs() < 1e-4);
//! ```

mod error;
mod history;
mod line_search;
mod objective;
mod options;
mod report;
mod solver;
mod step;

pub use error::{LbfgsError, LineSearchError, ObjectiveError, StepBound};
pub use history::{CorrectionHistory, CorrectionPair};
pub use line_search::{search_along, LineSearch, LineSearchParams, LineSearchStatus, SearchOutcome};
pub use objective::{Fallible, Objective, WithDiagonal};
pub use options::{LbfgsOptions, ReportOptions, DEFAULT_FTOL, DEFAULT_GTOL, MIN_GTOL};
pub use report::IterationReport;
pub use solver::{Lbfgs, LbfgsSolution};

use ndarray::Array1;

/// Minimizes `objective` from `x0` with the given options.
///
/// Shorthand for `Lbfgs::new(x0, objective).with_options(options).run()`.
pub fn minimize<O>(
    x0: Array1<f64>,
    objective: O,
    options: LbfgsOptions,
) -> Result<LbfgsSolution, LbfgsError>
where
    O: Objective,
{
    Lbfgs::new(x0, objective).with_options(options).run()
}
