//! Safeguarded trial-step selection for the More-Thuente line search.
//!
//! The interval of uncertainty is described by two [`Endpoint`]s: `best`, the
//! step with the lowest value seen so far, and `other`, the opposite end. Each
//! new trial either extrapolates or interpolates (cubic, quadratic or secant)
//! and then moves one of the ends, following More & Thuente, "Line search
//! algorithms with guaranteed sufficient decrease" (ACM TOMS 20, 1994).

/// Fraction of the bracket the next bounded step may travel away from `best`.
const BOUNDED_FRACTION: f64 = 0.66;

/// A step along the search direction with its value and directional derivative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Endpoint {
    pub step: f64,
    pub value: f64,
    pub slope: f64,
}

impl Endpoint {
    pub(crate) fn new(step: f64, value: f64, slope: f64) -> Self {
        Self { step, value, slope }
    }

    /// Moves the endpoint onto the modified function `psi(a) = f(a) - a * slope_test`.
    fn shifted(self, slope_test: f64) -> Self {
        Self {
            step: self.step,
            value: self.value - self.step * slope_test,
            slope: self.slope - slope_test,
        }
    }

    fn unshifted(self, slope_test: f64) -> Self {
        Self {
            step: self.step,
            value: self.value + self.step * slope_test,
            slope: self.slope + slope_test,
        }
    }
}

/// The branch of the selection rule that produced a new trial step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepCase {
    /// The trial value is higher than the best value.
    HigherValue,
    /// Lower value, derivatives of opposite sign.
    SlopeSignChange,
    /// Lower value, same sign, the derivative magnitude decreases.
    SlopeShrinks,
    /// Lower value, same sign, the derivative magnitude does not decrease.
    SlopeGrows,
}

impl StepCase {
    /// Whether the new step is kept within `BOUNDED_FRACTION` of the bracket.
    fn is_bounded(self) -> bool {
        matches!(self, StepCase::HigherValue | StepCase::SlopeShrinks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Interval {
    pub best: Endpoint,
    pub other: Endpoint,
    pub bracketed: bool,
}

impl Interval {
    /// A fresh interval with both ends at step zero.
    pub(crate) fn at_origin(value: f64, slope: f64) -> Self {
        let origin = Endpoint::new(0.0, value, slope);
        Self {
            best: origin,
            other: origin,
            bracketed: false,
        }
    }

    pub(crate) fn width(&self) -> f64 {
        (self.other.step - self.best.step).abs()
    }

    /// Computes a safeguarded step from the `trial` evaluation and updates the interval.
    ///
    /// `[step_min, step_max]` bounds the new step. Returns `None` and leaves the
    /// interval untouched when the inputs are inconsistent: a bracketed trial
    /// outside the bracket, a derivative at `best` that does not point towards
    /// the trial, or `step_max < step_min`.
    pub(crate) fn update(
        &mut self,
        trial: Endpoint,
        step_min: f64,
        step_max: f64,
    ) -> Option<(f64, StepCase)> {
        let best = self.best;
        let lo = best.step.min(self.other.step);
        let hi = best.step.max(self.other.step);
        if (self.bracketed && (trial.step <= lo || trial.step >= hi))
            || best.slope * (trial.step - best.step) >= 0.0
            || step_max < step_min
        {
            return None;
        }

        let opposite_signs = trial.slope * (best.slope / best.slope.abs()) < 0.0;

        let (candidate, case) = if trial.value > best.value {
            // The minimum is bracketed. Take the cubic step if it is closer to the
            // best step than the quadratic one, else the average of the two.
            let cubic = cubic_minimizer(best, trial);
            let quadratic = quadratic_minimizer(best, trial);
            self.bracketed = true;
            let step = if (cubic - best.step).abs() < (quadratic - best.step).abs() {
                cubic
            } else {
                cubic + (quadratic - cubic) / 2.0
            };
            (step, StepCase::HigherValue)
        } else if opposite_signs {
            // Bracketed as well. Take the cubic step if it is farther from the trial
            // than the secant step, else the secant step.
            let cubic = cubic_minimizer(trial, best);
            let secant = secant_minimizer(trial, best);
            self.bracketed = true;
            let step = if (cubic - trial.step).abs() > (secant - trial.step).abs() {
                cubic
            } else {
                secant
            };
            (step, StepCase::SlopeSignChange)
        } else if trial.slope.abs() < best.slope.abs() {
            // The cubic step is only used if the cubic tends to infinity in the
            // direction of the step or its minimum lies beyond the trial;
            // otherwise the cubic step is the bound in the direction of travel.
            let cubic = safeguarded_cubic_minimizer(trial, best, step_min, step_max);
            let secant = secant_minimizer(trial, best);
            let cubic_gap = (trial.step - cubic).abs();
            let secant_gap = (trial.step - secant).abs();
            // Bracketed: the step nearer the trial. Otherwise: the farther one.
            let take_cubic = if self.bracketed {
                cubic_gap < secant_gap
            } else {
                cubic_gap > secant_gap
            };
            let step = if take_cubic { cubic } else { secant };
            (step, StepCase::SlopeShrinks)
        } else {
            let step = if self.bracketed {
                cubic_minimizer(trial, self.other)
            } else if trial.step > best.step {
                step_max
            } else {
                step_min
            };
            (step, StepCase::SlopeGrows)
        };

        // The interval update does not depend on the new step.
        if trial.value > best.value {
            self.other = trial;
        } else {
            if opposite_signs {
                self.other = best;
            }
            self.best = trial;
        }

        let mut step = candidate.min(step_max).max(step_min);
        if self.bracketed && case.is_bounded() {
            let limit = self.best.step + BOUNDED_FRACTION * (self.other.step - self.best.step);
            step = if self.other.step > self.best.step {
                step.min(limit)
            } else {
                step.max(limit)
            };
        }
        Some((step, case))
    }

    /// Same as [`Interval::update`] but on the modified function
    /// `psi(a) = f(a) - a * slope_test`; the stored endpoints stay on `f`.
    pub(crate) fn update_modified(
        &mut self,
        trial: Endpoint,
        slope_test: f64,
        step_min: f64,
        step_max: f64,
    ) -> Option<(f64, StepCase)> {
        let mut modified = Interval {
            best: self.best.shifted(slope_test),
            other: self.other.shifted(slope_test),
            bracketed: self.bracketed,
        };
        let next = modified.update(trial.shifted(slope_test), step_min, step_max)?;
        self.best = modified.best.unshifted(slope_test);
        self.other = modified.other.unshifted(slope_test);
        self.bracketed = modified.bracketed;
        Some(next)
    }
}

/// Minimizer of the cubic interpolating values and derivatives at `u` and `v`.
fn cubic_minimizer(u: Endpoint, v: Endpoint) -> f64 {
    let theta = 3.0 * (u.value - v.value) / (v.step - u.step) + u.slope + v.slope;
    let s = theta.abs().max(u.slope.abs()).max(v.slope.abs());
    let a = theta / s;
    let mut gamma = s * (a * a - (u.slope / s) * (v.slope / s)).sqrt();
    if v.step < u.step {
        gamma = -gamma;
    }
    let p = (gamma - u.slope) + theta;
    let q = ((gamma - u.slope) + gamma) + v.slope;
    u.step + (p / q) * (v.step - u.step)
}

/// Cubic minimizer with the radical clamped at zero. When the cubic does not
/// tend to infinity beyond `u`, the bound in the direction of travel from `v`
/// to `u` is returned instead.
fn safeguarded_cubic_minimizer(u: Endpoint, v: Endpoint, step_min: f64, step_max: f64) -> f64 {
    let theta = 3.0 * (v.value - u.value) / (u.step - v.step) + v.slope + u.slope;
    let s = theta.abs().max(v.slope.abs()).max(u.slope.abs());
    let a = theta / s;
    // gamma == 0 only when the cubic does not tend to infinity in the direction of the step.
    let mut gamma = s * (a * a - (v.slope / s) * (u.slope / s)).max(0.0).sqrt();
    if u.step > v.step {
        gamma = -gamma;
    }
    let p = (gamma - u.slope) + theta;
    let q = (gamma + (v.slope - u.slope)) + gamma;
    let r = p / q;
    if r < 0.0 && gamma != 0.0 {
        u.step + r * (v.step - u.step)
    } else if u.step > v.step {
        step_max
    } else {
        step_min
    }
}

/// Minimizer of the quadratic through the values at `u` and `v` with the derivative at `u`.
fn quadratic_minimizer(u: Endpoint, v: Endpoint) -> f64 {
    let h = v.step - u.step;
    u.step + ((u.slope / ((u.value - v.value) / h + u.slope)) / 2.0) * h
}

/// Minimizer of the quadratic matching both derivatives (the secant step).
fn secant_minimizer(u: Endpoint, v: Endpoint) -> f64 {
    u.step + (u.slope / (u.slope - v.slope)) * (v.step - u.step)
}

#[cfg(test)]
mod tests {
    use super::{
        cubic_minimizer, quadratic_minimizer, secant_minimizer, Endpoint, Interval, StepCase,
    };
    use spectral::prelude::*;

    /// phi(a) = (a - 2)^2 sampled as an endpoint.
    fn parabola(a: f64) -> Endpoint {
        Endpoint::new(a, (a - 2.0).powi(2), 2.0 * (a - 2.0))
    }

    /// phi(a) = a^3 - 3a, minimum at a = 1.
    fn cubic(a: f64) -> Endpoint {
        Endpoint::new(a, a.powi(3) - 3.0 * a, 3.0 * a * a - 3.0)
    }

    #[test]
    fn interpolants_recover_the_parabola_minimum() {
        let u = parabola(0.0);
        let v = parabola(5.0);
        assert_that!(&quadratic_minimizer(u, v)).is_close_to(2.0, 1e-12);
        assert_that!(&secant_minimizer(u, v)).is_close_to(2.0, 1e-12);
        assert_that!(&cubic_minimizer(u, v)).is_close_to(2.0, 1e-12);
    }

    #[test]
    fn cubic_interpolation_is_exact_on_a_cubic() {
        let u = cubic(0.0);
        let v = cubic(3.0);
        assert_that!(&cubic_minimizer(u, v)).is_close_to(1.0, 1e-12);
        assert_that!(&cubic_minimizer(v, u)).is_close_to(1.0, 1e-12);
    }

    #[test]
    fn higher_value_brackets_and_shrinks_towards_best() {
        let mut interval = Interval::at_origin(4.0, -4.0);
        let (step, case) = interval.update(parabola(10.0), 0.0, 50.0).unwrap();
        assert_eq!(case, StepCase::HigherValue);
        assert!(interval.bracketed);
        assert_eq!(interval.best.step, 0.0);
        assert_eq!(interval.other.step, 10.0);
        // The exact minimizer 2.0 is within 0.66 of the bracket from the best end.
        assert_that!(&step).is_close_to(2.0, 1e-12);
    }

    #[test]
    fn slope_sign_change_moves_best_and_keeps_old_best_as_other() {
        let mut interval = Interval::at_origin(4.0, -4.0);
        let (step, case) = interval.update(parabola(3.0), 0.0, 15.0).unwrap();
        assert_eq!(case, StepCase::SlopeSignChange);
        assert!(interval.bracketed);
        assert_eq!(interval.best.step, 3.0);
        assert_eq!(interval.other.step, 0.0);
        assert_that!(&step).is_close_to(2.0, 1e-12);
    }

    #[test]
    fn growing_slope_extrapolates_to_the_upper_bound() {
        // phi(a) = -a^2 has a steepening negative slope.
        let mut interval = Interval::at_origin(0.0, -1.0);
        let trial = Endpoint::new(1.0, -1.0, -2.0);
        let (step, case) = interval.update(trial, 0.0, 5.0).unwrap();
        assert_eq!(case, StepCase::SlopeGrows);
        assert!(!interval.bracketed);
        assert_eq!(interval.best.step, 1.0);
        assert_eq!(step, 5.0);
    }

    #[test]
    fn shrinking_slope_without_bracket_extrapolates() {
        let mut interval = Interval::at_origin(4.0, -4.0);
        let (step, case) = interval.update(parabola(1.0), 1.0, 5.0).unwrap();
        assert_eq!(case, StepCase::SlopeShrinks);
        assert!(!interval.bracketed);
        assert_that!(&step).is_greater_than(1.0);
        assert_that!(&step).is_less_than_or_equal_to(5.0);
    }

    #[test]
    fn inconsistent_inputs_leave_the_interval_untouched() {
        let mut interval = Interval::at_origin(4.0, 4.0);
        let before = interval;
        // A positive slope at the origin cannot point towards a positive step.
        assert!(interval.update(parabola(1.0), 0.0, 5.0).is_none());
        assert_eq!(interval, before);

        let mut interval = Interval::at_origin(4.0, -4.0);
        assert!(interval.update(parabola(1.0), 5.0, 1.0).is_none());
    }

    #[test]
    fn modified_update_keeps_endpoints_on_the_unmodified_function() {
        let mut interval = Interval::at_origin(4.0, -4.0);
        let trial = parabola(3.0);
        interval.update_modified(trial, -4e-4, 0.0, 15.0).unwrap();
        assert_that!(&interval.best.value).is_close_to(trial.value, 1e-12);
        assert_that!(&interval.best.slope).is_close_to(trial.slope, 1e-12);
        assert_that!(&interval.other.value).is_close_to(4.0, 1e-12);
    }
}
