//! A resumable More-Thuente line search.
//!
//! [`LineSearch`] never evaluates anything itself. It proposes a trial step,
//! the caller evaluates the objective at `x + step * s` and hands back the
//! value and the directional derivative through [`LineSearch::resume`], until
//! the search converges or fails. [`search_along`] runs that loop against an
//! [`Objective`].
//!
//! A step is accepted once it satisfies
//!
//! - sufficient decrease: `f(x + a s) <= f(x) + ftol * a * gᵀs`
//! - curvature: `|g(x + a s)ᵀ s| <= gtol * |gᵀs|`

use crate::error::{LbfgsError, LineSearchError, StepBound};
use crate::objective::{evaluate_checked, Objective};
use crate::step::{Endpoint, Interval};
use ndarray::Array1;

/// Growth factor of the extrapolation window while no minimizer is bracketed.
const EXTRAPOLATION: f64 = 4.0;
/// A bracket that did not shrink below this fraction of the width two updates
/// ago is bisected.
const SHRINK: f64 = 0.66;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchParams {
    pub ftol: f64,
    pub gtol: f64,
    /// Relative width of the interval of uncertainty at which the search stops.
    pub xtol: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub max_evaluations: usize,
}

impl Default for LineSearchParams {
    fn default() -> Self {
        Self {
            ftol: 1e-4,
            gtol: 0.9,
            xtol: f64::EPSILON,
            min_step: 1e-20,
            max_step: 1e20,
            max_evaluations: 20,
        }
    }
}

impl LineSearchParams {
    pub fn validate(&self) -> Result<(), LineSearchError> {
        let reason = if !(self.ftol >= 0.0) {
            "ftol must be non-negative"
        } else if !(self.gtol >= 0.0) {
            "gtol must be non-negative"
        } else if !(self.xtol >= 0.0) {
            "xtol must be non-negative"
        } else if !(self.min_step >= 0.0) {
            "the minimum step must be non-negative"
        } else if !(self.max_step >= self.min_step) {
            "the maximum step must not be below the minimum step"
        } else if self.max_evaluations == 0 {
            "at least one function evaluation per line search is required"
        } else {
            return Ok(());
        };
        Err(LineSearchError::ImproperInput { reason })
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineSearchStatus {
    /// Evaluate the objective at `x + step * s` and call [`LineSearch::resume`].
    Evaluate { step: f64 },
    /// The last evaluated step satisfies both conditions.
    Converged { step: f64 },
}

/// State of one line search. Created per search and dropped when it ends.
#[derive(Debug, Clone)]
pub struct LineSearch {
    params: LineSearchParams,
    initial_value: f64,
    initial_slope: f64,
    /// `ftol * initial_slope`, the slope of the sufficient decrease line.
    slope_test: f64,
    interval: Interval,
    step: f64,
    step_min: f64,
    step_max: f64,
    stage_one: bool,
    width: f64,
    prev_width: f64,
    evaluations: usize,
    consistent: bool,
}

impl LineSearch {
    /// Starts a search from a point with value `value` and directional
    /// derivative `slope` along the search direction, proposing `step` first.
    pub fn start(
        params: &LineSearchParams,
        value: f64,
        slope: f64,
        step: f64,
    ) -> Result<Self, LineSearchError> {
        params.validate()?;
        if !(step > 0.0) {
            return Err(LineSearchError::ImproperInput {
                reason: "the initial step must be positive",
            });
        }
        if !(slope < 0.0) {
            log::warn!(
                "[L-BFGS Search] Non-descent direction detected (gᵀs = {:.2e} >= 0).",
                slope
            );
            return Err(LineSearchError::NotADescentDirection { slope });
        }
        let width = params.max_step - params.min_step;
        let mut search = Self {
            params: *params,
            initial_value: value,
            initial_slope: slope,
            slope_test: params.ftol * slope,
            interval: Interval::at_origin(value, slope),
            step,
            step_min: 0.0,
            step_max: 0.0,
            stage_one: true,
            width,
            prev_width: 2.0 * width,
            evaluations: 0,
            consistent: true,
        };
        search.prepare_trial();
        Ok(search)
    }

    /// The step the caller must evaluate next.
    pub fn trial_step(&self) -> f64 {
        self.step
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Feeds back `value` and directional derivative `slope` at [`Self::trial_step`].
    pub fn resume(&mut self, value: f64, slope: f64) -> Result<LineSearchStatus, LineSearchError> {
        self.evaluations += 1;
        let step = self.step;
        let params = self.params;
        let bracketed = self.interval.bracketed;
        let sufficient = self.initial_value + step * self.slope_test;

        if value <= sufficient && slope.abs() <= params.gtol * (-self.initial_slope) {
            return Ok(LineSearchStatus::Converged { step });
        }
        if bracketed && self.step_max - self.step_min <= params.xtol * self.step_max {
            return Err(LineSearchError::Stalled {
                step,
                width: self.step_max - self.step_min,
            });
        }
        if self.evaluations >= params.max_evaluations {
            return Err(LineSearchError::MaxEvaluationsExceeded {
                evaluations: self.evaluations,
            });
        }
        if step == params.min_step && (value > sufficient || slope >= self.slope_test) {
            return Err(LineSearchError::StepPinnedAtBound {
                bound: StepBound::Min,
                step,
            });
        }
        if step == params.max_step && value <= sufficient && slope <= self.slope_test {
            return Err(LineSearchError::StepPinnedAtBound {
                bound: StepBound::Max,
                step,
            });
        }
        if (bracketed && (step <= self.step_min || step >= self.step_max)) || !self.consistent {
            return Err(LineSearchError::RoundingError { step });
        }

        // Stage one ends at the first step where the modified function has a
        // nonpositive value and a nonnegative derivative.
        if self.stage_one
            && value <= sufficient
            && slope >= params.ftol.min(params.gtol) * self.initial_slope
        {
            self.stage_one = false;
        }

        let trial = Endpoint::new(step, value, slope);
        // The modified function predicts the step only while in stage one and a
        // lower, but not sufficiently lower, value has been obtained.
        let next = if self.stage_one && value <= self.interval.best.value && value > sufficient {
            self.interval
                .update_modified(trial, self.slope_test, self.step_min, self.step_max)
        } else {
            self.interval.update(trial, self.step_min, self.step_max)
        };
        match next {
            Some((next_step, case)) => {
                log::trace!(
                    "[L-BFGS Search] {:?}: step {:.6e} -> {:.6e}, bracketed = {}",
                    case,
                    step,
                    next_step,
                    self.interval.bracketed
                );
                self.step = next_step;
            }
            None => self.consistent = false,
        }

        // Force a sufficient decrease in the size of the interval of uncertainty.
        if self.interval.bracketed {
            let width = self.interval.width();
            if width >= SHRINK * self.prev_width {
                self.step = self.interval.best.step
                    + 0.5 * (self.interval.other.step - self.interval.best.step);
            }
            self.prev_width = self.width;
            self.width = width;
        }

        self.prepare_trial();
        Ok(LineSearchStatus::Evaluate { step: self.step })
    }

    fn prepare_trial(&mut self) {
        let best = self.interval.best.step;
        if self.interval.bracketed {
            let other = self.interval.other.step;
            self.step_min = best.min(other);
            self.step_max = best.max(other);
        } else {
            self.step_min = best;
            self.step_max = self.step + EXTRAPOLATION * (self.step - best);
        }
        self.step = self.step.max(self.params.min_step).min(self.params.max_step);

        // If an unusual termination is about to occur, evaluate the best step so far.
        let bracketed = self.interval.bracketed;
        if (bracketed && (self.step <= self.step_min || self.step >= self.step_max))
            || self.evaluations + 1 >= self.params.max_evaluations
            || !self.consistent
            || (bracketed && self.step_max - self.step_min <= self.params.xtol * self.step_max)
        {
            self.step = best;
        }
    }
}

/// Summary of a successful [`search_along`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    pub step: f64,
    pub evaluations: usize,
    /// `gᵀs` at the starting point.
    pub initial_slope: f64,
    /// `gᵀs` at the accepted point.
    pub final_slope: f64,
}

/// Runs a line search from `x` along `direction`, evaluating `objective` at each trial.
///
/// On entry `value` and `gradient` must hold `f(x)` and `∇f(x)`. On success
/// `x`, `value` and `gradient` describe the accepted point. On failure they
/// hold the last trial point, except for a rejected start (improper input or
/// a non-descent direction), which leaves them untouched.
#[allow(clippy::too_many_arguments)]
pub fn search_along<O>(
    params: &LineSearchParams,
    objective: &mut O,
    x: &mut Array1<f64>,
    value: &mut f64,
    gradient: &mut Array1<f64>,
    direction: &Array1<f64>,
    step: f64,
) -> Result<SearchOutcome, LbfgsError>
where
    O: Objective + ?Sized,
{
    let initial_slope = gradient.dot(direction);
    let mut search = LineSearch::start(params, *value, initial_slope, step)?;
    let base = x.clone();
    loop {
        let trial = search.trial_step();
        x.assign(&base);
        x.scaled_add(trial, direction);
        let (f, g) = evaluate_checked(objective, x)?;
        *value = f;
        *gradient = g;
        let slope = gradient.dot(direction);
        match search.resume(f, slope)? {
            LineSearchStatus::Converged { step } => {
                return Ok(SearchOutcome {
                    step,
                    evaluations: search.evaluations(),
                    initial_slope,
                    final_slope: slope,
                });
            }
            LineSearchStatus::Evaluate { .. } => continue,
        }
    }
}
