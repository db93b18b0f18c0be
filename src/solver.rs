//! The L-BFGS driver.

use crate::error::LbfgsError;
use crate::history::{CorrectionHistory, CorrectionPair};
use crate::line_search::search_along;
use crate::objective::{caller_diagonal, evaluate_checked, Objective};
use crate::options::{LbfgsOptions, ReportOptions};
use crate::report::{log_progress, IterationReport};
use ndarray::Array1;

/// A summary of a successful optimization run.
///
/// Note that for non-convex functions, convergence to a local minimum is not guaranteed.
#[derive(Debug, Clone)]
pub struct LbfgsSolution {
    /// The point at which the minimum value was found.
    pub final_point: Array1<f64>,
    /// The minimum value of the objective function.
    pub final_value: f64,
    /// The norm of the gradient at the final point.
    pub final_gradient_norm: f64,
    /// The total number of iterations performed.
    pub iterations: usize,
    /// The total number of times the objective was evaluated, gradient included.
    pub func_evals: usize,
}

/// Starting point and configuration, kept apart from the objective so that
/// `run` can borrow both.
struct LbfgsCore {
    x0: Array1<f64>,
    options: LbfgsOptions,
}

impl LbfgsCore {
    fn run<O, P>(&self, objective: &mut O, progress: &mut P) -> Result<LbfgsSolution, LbfgsError>
    where
        O: Objective + ?Sized,
        P: FnMut(&IterationReport),
    {
        let n = self.x0.len();
        let options = self.options.validated(n)?;
        let params = options.line_search_params();

        let mut x = self.x0.clone();
        // A missing or unusable caller diagonal is an input error, so it is
        // fetched before the first evaluation and reused for iteration 1.
        let mut initial_diag = if options.use_caller_diagonal {
            Some(caller_diagonal(objective, &x)?)
        } else {
            None
        };
        let (mut f, mut g) = evaluate_checked(objective, &x)?;
        let mut func_evals = 1;
        let mut g_norm = g.dot(&g).sqrt();
        if !g_norm.is_finite() {
            log::warn!("[L-BFGS] Non-finite gradient at the starting point: ||g||={:?}", g_norm);
            return Err(LbfgsError::NonFiniteGradient { iteration: 0 });
        }

        let mut history = CorrectionHistory::new(options.corrections);
        let mut iteration = 0;
        loop {
            if options.max_iterations.is_some_and(|max| iteration >= max) {
                let last_solution = Box::new(LbfgsSolution {
                    final_point: x,
                    final_value: f,
                    final_gradient_norm: g_norm,
                    iterations: iteration,
                    func_evals,
                });
                log::warn!(
                    "[L-BFGS] Max iterations reached: iters={}, f={:.6e}, ||g||={:.3e}, fe={}",
                    iteration,
                    last_solution.final_value,
                    last_solution.final_gradient_norm,
                    last_solution.func_evals
                );
                return Err(LbfgsError::MaxIterationsReached { last_solution });
            }
            iteration += 1;

            let diag = if options.use_caller_diagonal {
                match initial_diag.take() {
                    Some(diag) => diag,
                    None => caller_diagonal(objective, &x)?,
                }
            } else {
                match history.latest() {
                    Some(pair) => Array1::from_elem(n, pair.scaling()),
                    None => Array1::ones(n),
                }
            };
            let direction = history.direction(&g, &diag);
            // The first direction is unscaled steepest descent, so start with a unit-length move.
            let step = if iteration == 1 { 1.0 / g_norm } else { 1.0 };

            let g_old = g.clone();
            let outcome = match search_along(&params, objective, &mut x, &mut f, &mut g, &direction, step)
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::warn!(
                        "[L-BFGS] Terminated at iter {} after {} evaluations: {}",
                        iteration,
                        func_evals,
                        err
                    );
                    return Err(err);
                }
            };
            func_evals += outcome.evaluations;
            history.push(CorrectionPair::new(
                iteration,
                outcome.step * &direction,
                &g - &g_old,
            ));

            g_norm = g.dot(&g).sqrt();
            if !g_norm.is_finite() {
                log::warn!(
                    "[L-BFGS] Non-finite gradient norm at iter {}: ||g||={:?}",
                    iteration,
                    g_norm
                );
                return Err(LbfgsError::NonFiniteGradient { iteration });
            }
            let x_norm = x.dot(&x).sqrt();

            let report = IterationReport {
                iteration,
                evaluations: func_evals,
                value: f,
                gradient_norm: g_norm,
                point_norm: x_norm,
                step: outcome.step,
                initial_slope: outcome.initial_slope,
                final_slope: outcome.final_slope,
                corrections: history.len(),
            };
            log_progress(&report, &options.report, &x, &g);
            progress(&report);

            if g_norm / x_norm.max(1.0) <= options.tolerance {
                log::info!(
                    "[L-BFGS] Converged: iters={}, f={:.6e}, ||g||={:.3e}, fe={}",
                    iteration,
                    f,
                    g_norm,
                    func_evals
                );
                return Ok(LbfgsSolution {
                    final_point: x,
                    final_value: f,
                    final_gradient_norm: g_norm,
                    iterations: iteration,
                    func_evals,
                });
            }
        }
    }
}

/// A configurable L-BFGS solver.
pub struct Lbfgs<O> {
    core: LbfgsCore,
    objective: O,
    progress: Option<Box<dyn FnMut(&IterationReport)>>,
}

impl<O> Lbfgs<O>
where
    O: Objective,
{
    /// Creates a new L-BFGS solver.
    ///
    /// # Arguments
    /// * `x0` - The initial guess for the minimum.
    /// * `objective` - Anything implementing [`Objective`], typically a closure
    ///   returning `(value, gradient)`.
    pub fn new(x0: Array1<f64>, objective: O) -> Self {
        Self {
            core: LbfgsCore {
                x0,
                options: LbfgsOptions::default(),
            },
            objective,
            progress: None,
        }
    }

    /// Sets the number of stored correction pairs (default: 3).
    pub fn with_corrections(mut self, corrections: usize) -> Self {
        self.core.options.corrections = corrections;
        self
    }

    /// Sets the convergence tolerance on `||g|| / max(1, ||x||)` (default: 1e-6).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.core.options.tolerance = tolerance;
        self
    }

    /// Sets the sufficient decrease and curvature tolerances (default: 1e-4, 0.9).
    pub fn with_line_search_tolerances(mut self, ftol: f64, gtol: f64) -> Self {
        self.core.options.ftol = ftol;
        self.core.options.gtol = gtol;
        self
    }

    pub fn with_interval_tolerance(mut self, xtol: f64) -> Self {
        self.core.options.xtol = xtol;
        self
    }

    /// Sets the range of admissible line search steps (default: `[1e-20, 1e20]`).
    pub fn with_step_bounds(mut self, min_step: f64, max_step: f64) -> Self {
        self.core.options.min_step = min_step;
        self.core.options.max_step = max_step;
        self
    }

    /// Sets the function evaluations allowed per line search (default: 20).
    pub fn with_max_evaluations_per_search(mut self, max_evaluations: usize) -> Self {
        self.core.options.max_evaluations_per_search = max_evaluations;
        self
    }

    /// Uses [`Objective::diagonal`] as the initial inverse Hessian each iteration.
    pub fn with_caller_diagonal(mut self, enable: bool) -> Self {
        self.core.options.use_caller_diagonal = enable;
        self
    }

    /// Caps the number of outer iterations (default: unlimited).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.core.options.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_report(mut self, report: ReportOptions) -> Self {
        self.core.options.report = report;
        self
    }

    /// Replaces every option at once, e.g. with options read from a config file.
    pub fn with_options(mut self, options: LbfgsOptions) -> Self {
        self.core.options = options;
        self
    }

    pub fn options(&self) -> &LbfgsOptions {
        &self.core.options
    }

    /// Registers a callback invoked after every completed iteration.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&IterationReport) + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Executes L-BFGS with the More-Thuente line search.
    pub fn run(&mut self) -> Result<LbfgsSolution, LbfgsError> {
        let progress = &mut self.progress;
        self.core
            .run(&mut self.objective, &mut |report: &IterationReport| {
                if let Some(callback) = progress.as_mut() {
                    callback(report);
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{Lbfgs, LbfgsSolution};
    use crate::error::{LbfgsError, LineSearchError};
    use crate::objective::{Fallible, Objective, WithDiagonal};
    use crate::report::IterationReport;
    use ndarray::{array, Array1};
    use spectral::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn quadratic(x: &Array1<f64>) -> (f64, Array1<f64>) {
        (x.dot(x), 2.0 * x)
    }

    /// The Rosenbrock function, minimum at [1, 1].
    fn rosenbrock(x: &Array1<f64>) -> (f64, Array1<f64>) {
        let a = 1.0;
        let b = 100.0;
        let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
        let g = array![
            -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
            2.0 * b * (x[1] - x[0].powi(2))
        ];
        (f, g)
    }

    const SCALES: [f64; 4] = [1.0, 10.0, 100.0, 1000.0];

    /// sum a_i x_i^2 with condition number 1000.
    fn separable(x: &Array1<f64>) -> (f64, Array1<f64>) {
        let a = Array1::from(SCALES.to_vec());
        let f = (&a * x * x).sum();
        (f, 2.0 * &a * x)
    }

    fn linear_function(x: &Array1<f64>) -> (f64, Array1<f64>) {
        (2.0 * x[0] + 3.0 * x[1], array![2.0, 3.0])
    }

    fn record<O: Objective>(
        solver: Lbfgs<O>,
    ) -> (Result<LbfgsSolution, LbfgsError>, Vec<IterationReport>) {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reports);
        let result = solver
            .with_progress(move |r: &IterationReport| sink.borrow_mut().push(r.clone()))
            .run();
        let reports = reports.borrow().clone();
        (result, reports)
    }

    #[test]
    fn rosenbrock_converges() {
        let x0 = array![-1.2, 1.0];
        let sol = Lbfgs::new(x0, rosenbrock).run().unwrap();
        assert_that!(&sol.final_point[0]).is_close_to(1.0, 1e-4);
        assert_that!(&sol.final_point[1]).is_close_to(1.0, 1e-4);
        assert_that!(&sol.iterations).is_less_than(200);
    }

    #[test]
    fn sum_of_squares_converges_within_twenty_iterations() {
        let x0 = Array1::ones(10);
        let sol = Lbfgs::new(x0, quadratic).with_corrections(3).run().unwrap();
        assert_that!(&sol.iterations).is_less_than_or_equal_to(20);
        assert_that!(&sol.final_point.dot(&sol.final_point).sqrt()).is_less_than(1e-5);
        // The first step already satisfies both conditions, the second is the exact minimizer.
        assert_eq!(sol.iterations, 2);
        assert_eq!(sol.func_evals, 3);
    }

    #[test]
    fn separable_quadratic_converges() {
        let sol = Lbfgs::new(array![1.0, -2.0, 3.0, -4.0], separable)
            .with_corrections(5)
            .with_tolerance(1e-8)
            .run()
            .unwrap();
        for &xi in sol.final_point.iter() {
            assert_that!(&xi).is_close_to(0.0, 1e-6);
        }
        assert_that!(&sol.final_value).is_less_than(1e-10);
    }

    #[test]
    fn every_iteration_descends_and_satisfies_the_search_conditions() {
        let solver = Lbfgs::new(array![1.0, -2.0, 3.0, -4.0], separable)
            .with_corrections(5)
            .with_tolerance(1e-8);
        let (result, reports) = record(solver);
        let sol = result.unwrap();
        assert_eq!(reports.len(), sol.iterations);

        let (f0, _) = separable(&array![1.0, -2.0, 3.0, -4.0]);
        let mut previous = f0;
        for report in &reports {
            assert_that!(&report.value).is_less_than(previous);
            assert_that!(&report.value)
                .is_less_than_or_equal_to(previous + 1e-4 * report.step * report.initial_slope);
            assert_that!(&report.initial_slope).is_less_than(0.0);
            assert_that!(&report.final_slope.abs())
                .is_less_than_or_equal_to(0.9 * report.initial_slope.abs());
            previous = report.value;
        }
    }

    #[test]
    fn history_holds_at_most_m_pairs() {
        let solver = Lbfgs::new(array![-1.2, 1.0], rosenbrock).with_corrections(3);
        let (result, reports) = record(solver);
        assert!(result.is_ok());
        assert_that!(&reports.len()).is_greater_than(3);
        for report in &reports {
            assert_eq!(report.corrections, report.iteration.min(3));
        }
    }

    #[test]
    fn zero_gradient_at_start_is_not_a_descent_direction() {
        let mut calls = 0;
        let result = Lbfgs::new(array![0.0, 0.0], |x: &Array1<f64>| {
            calls += 1;
            quadratic(x)
        })
        .run();
        assert!(matches!(
            result,
            Err(LbfgsError::NotADescentDirection { .. })
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn improper_input_is_rejected_before_any_evaluation() {
        let mut calls = 0;
        let result = Lbfgs::new(array![1.0, 2.0], |x: &Array1<f64>| {
            calls += 1;
            quadratic(x)
        })
        .with_corrections(0)
        .run();
        assert!(matches!(result, Err(LbfgsError::ImproperInput { .. })));

        let result = Lbfgs::new(Array1::zeros(0), |x: &Array1<f64>| {
            calls += 1;
            quadratic(x)
        })
        .run();
        assert!(matches!(result, Err(LbfgsError::ImproperInput { .. })));
        assert_eq!(calls, 0);
    }

    #[test]
    fn unbounded_objective_fails_in_the_line_search() {
        let result = Lbfgs::new(array![10.0, 10.0], linear_function).run();
        assert!(matches!(
            result,
            Err(LbfgsError::LineSearchFailed(
                LineSearchError::MaxEvaluationsExceeded { evaluations: 20 }
            ))
        ));
    }

    #[test]
    fn max_iterations_error_is_returned() {
        let result = Lbfgs::new(array![-1.2, 1.0], rosenbrock)
            .with_max_iterations(5)
            .run();
        match result {
            Err(LbfgsError::MaxIterationsReached { last_solution }) => {
                assert_eq!(last_solution.iterations, 5);
                let (f0, _) = rosenbrock(&array![-1.2, 1.0]);
                assert_that!(&last_solution.final_value).is_less_than(f0);
            }
            other => panic!("Expected MaxIterationsReached error, but got {:?}", other),
        }
    }

    #[test]
    fn caller_diagonal_is_used() {
        let inverse_hessian = |_: &Array1<f64>| SCALES.iter().map(|a| 0.5 / a).collect::<Array1<f64>>();
        let objective = WithDiagonal::new(separable, inverse_hessian);
        let sol = Lbfgs::new(array![1.0, -2.0, 3.0, -4.0], objective)
            .with_caller_diagonal(true)
            .with_tolerance(1e-8)
            .run()
            .unwrap();
        assert_that!(&sol.iterations).is_less_than_or_equal_to(3);
        for &xi in sol.final_point.iter() {
            assert_that!(&xi).is_close_to(0.0, 1e-8);
        }
    }

    #[test]
    fn non_positive_caller_diagonal_is_rejected() {
        let mut calls = 0;
        let objective = |x: &Array1<f64>| {
            calls += 1;
            quadratic(x)
        };
        let objective = WithDiagonal::new(objective, |_: &Array1<f64>| array![1.0, -1.0]);
        let result = Lbfgs::new(array![1.0, 1.0], objective)
            .with_caller_diagonal(true)
            .run();
        assert!(matches!(
            result,
            Err(LbfgsError::NonPositiveDiagonal { index: 1, .. })
        ));
        assert_eq!(calls, 0);
    }

    #[test]
    fn missing_caller_diagonal_is_rejected_before_any_evaluation() {
        let mut calls = 0;
        let result = Lbfgs::new(array![1.0, 1.0], |x: &Array1<f64>| {
            calls += 1;
            quadratic(x)
        })
        .with_caller_diagonal(true)
        .run();
        assert!(matches!(result, Err(LbfgsError::ImproperInput { .. })));
        assert_eq!(calls, 0);
    }

    #[test]
    fn caller_diagonal_is_checked_on_every_iteration() {
        // Positive at the starting point only.
        let diagonal = |x: &Array1<f64>| {
            if x[0] == 1.0 {
                array![0.5, 0.5]
            } else {
                array![0.5, -0.5]
            }
        };
        let result = Lbfgs::new(array![1.0, 1.0], WithDiagonal::new(quadratic, diagonal))
            .with_caller_diagonal(true)
            .run();
        assert!(matches!(
            result,
            Err(LbfgsError::NonPositiveDiagonal { index: 1, .. })
        ));
    }

    #[test]
    fn objective_errors_propagate() {
        let mut calls = 0;
        let objective = Fallible(|x: &Array1<f64>| {
            calls += 1;
            if calls > 2 {
                return Err("model evaluation diverged");
            }
            Ok(rosenbrock(x))
        });
        let result = Lbfgs::new(array![-1.2, 1.0], objective).run();
        match result {
            Err(LbfgsError::Objective(source)) => {
                assert_eq!(source.to_string(), "model evaluation diverged")
            }
            other => panic!("Expected an objective error, but got {:?}", other),
        }
    }

    #[test]
    fn nan_gradient_at_start_returns_error() {
        let nan_fn = |_: &Array1<f64>| (f64::NAN, array![f64::NAN]);
        let result = Lbfgs::new(array![1.0], nan_fn).run();
        assert!(matches!(
            result,
            Err(LbfgsError::NonFiniteGradient { iteration: 0 })
        ));
    }

    #[test]
    fn options_round_trip_through_the_builder() {
        let solver = Lbfgs::new(array![1.0], quadratic)
            .with_corrections(7)
            .with_step_bounds(1e-10, 1e10)
            .with_max_evaluations_per_search(30);
        let opts = solver.options().clone();
        assert_eq!(opts.corrections, 7);
        assert_eq!(opts.max_evaluations_per_search, 30);
        let sol = Lbfgs::new(array![3.0, -1.0], quadratic)
            .with_options(opts)
            .run()
            .unwrap();
        assert_that!(&sol.final_value).is_less_than(1e-10);
    }
}
