//! The function being minimized.

use crate::error::{LbfgsError, ObjectiveError};
use ndarray::Array1;

/// A differentiable objective supplying the value and gradient at a point.
///
/// Any closure `FnMut(&Array1<f64>) -> (f64, Array1<f64>)` is an objective.
/// Use [`Fallible`] for closures that can fail and [`WithDiagonal`] to attach
/// a diagonal inverse Hessian estimate.
pub trait Objective {
    /// Returns `(f(x), ∇f(x))`.
    fn evaluate(&mut self, x: &Array1<f64>) -> Result<(f64, Array1<f64>), ObjectiveError>;

    /// Returns a diagonal approximation of the inverse Hessian at `x`, if the
    /// objective can provide one. Only consulted when the solver is configured
    /// to use the caller's diagonal; every entry must be positive.
    fn diagonal(&mut self, _x: &Array1<f64>) -> Result<Option<Array1<f64>>, ObjectiveError> {
        Ok(None)
    }
}

impl<F> Objective for F
where
    F: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn evaluate(&mut self, x: &Array1<f64>) -> Result<(f64, Array1<f64>), ObjectiveError> {
        Ok(self(x))
    }
}

/// Adapts a closure returning `Result<(f64, Array1<f64>), E>`.
///
/// ```
/// use lbfgs_mcsrch::{Fallible, Lbfgs, LbfgsError};
/// use ndarray::{array, Array1};
///
/// let log_barrier = Fallible(|x: &Array1<f64>| {
///     if x[0] <= 0.0 {
///         return Err(format!("log undefined at {}", x[0]));
///     }
///     Ok((x[0] - x[0].ln(), array![1.0 - 1.0 / x[0]]))
/// });
/// let result = Lbfgs::new(array![-1.0], log_barrier).run();
/// assert!(matches!(result, Err(LbfgsError::Objective(_))));
/// ```
pub struct Fallible<F>(pub F);

impl<F, E> Objective for Fallible<F>
where
    F: FnMut(&Array1<f64>) -> Result<(f64, Array1<f64>), E>,
    E: Into<ObjectiveError>,
{
    fn evaluate(&mut self, x: &Array1<f64>) -> Result<(f64, Array1<f64>), ObjectiveError> {
        (self.0)(x).map_err(Into::into)
    }
}

/// Pairs an objective with a closure computing a diagonal inverse Hessian estimate.
pub struct WithDiagonal<O, D> {
    pub objective: O,
    pub diagonal: D,
}

impl<O, D> WithDiagonal<O, D> {
    pub fn new(objective: O, diagonal: D) -> Self {
        Self {
            objective,
            diagonal,
        }
    }
}

impl<O, D> Objective for WithDiagonal<O, D>
where
    O: Objective,
    D: FnMut(&Array1<f64>) -> Array1<f64>,
{
    fn evaluate(&mut self, x: &Array1<f64>) -> Result<(f64, Array1<f64>), ObjectiveError> {
        self.objective.evaluate(x)
    }

    fn diagonal(&mut self, x: &Array1<f64>) -> Result<Option<Array1<f64>>, ObjectiveError> {
        Ok(Some((self.diagonal)(x)))
    }
}

/// Evaluates `objective` at `x` and checks the gradient length.
pub(crate) fn evaluate_checked<O>(
    objective: &mut O,
    x: &Array1<f64>,
) -> Result<(f64, Array1<f64>), LbfgsError>
where
    O: Objective + ?Sized,
{
    let (value, gradient) = objective.evaluate(x).map_err(LbfgsError::Objective)?;
    if gradient.len() != x.len() {
        return Err(LbfgsError::DimensionMismatch {
            what: "gradient",
            expected: x.len(),
            found: gradient.len(),
        });
    }
    Ok((value, gradient))
}

/// Fetches the caller's diagonal at `x` and checks that it is usable.
pub(crate) fn caller_diagonal<O>(objective: &mut O, x: &Array1<f64>) -> Result<Array1<f64>, LbfgsError>
where
    O: Objective + ?Sized,
{
    let diag = objective
        .diagonal(x)
        .map_err(LbfgsError::Objective)?
        .ok_or_else(|| {
            LbfgsError::improper(
                "a caller-supplied diagonal was requested but the objective does not provide one",
            )
        })?;
    if diag.len() != x.len() {
        return Err(LbfgsError::DimensionMismatch {
            what: "diagonal",
            expected: x.len(),
            found: diag.len(),
        });
    }
    if let Some((index, &value)) = diag.iter().enumerate().find(|&(_, &d)| !(d > 0.0)) {
        return Err(LbfgsError::NonPositiveDiagonal { index, value });
    }
    Ok(diag)
}

#[cfg(test)]
mod tests {
    use super::{caller_diagonal, evaluate_checked, Fallible, Objective, WithDiagonal};
    use crate::error::LbfgsError;
    use ndarray::{array, Array1};

    fn bowl(x: &Array1<f64>) -> (f64, Array1<f64>) {
        (x.dot(x), 2.0 * x)
    }

    #[test]
    fn closures_are_objectives() {
        let mut f = bowl;
        let (value, gradient) = f.evaluate(&array![1.0, 2.0]).unwrap();
        assert_eq!(value, 5.0);
        assert_eq!(gradient, array![2.0, 4.0]);
        assert!(f.diagonal(&array![1.0, 2.0]).unwrap().is_none());
    }

    #[test]
    fn fallible_errors_are_boxed() {
        let mut f = Fallible(|_: &Array1<f64>| -> Result<(f64, Array1<f64>), String> {
            Err("domain error".to_string())
        });
        let err = evaluate_checked(&mut f, &array![0.0]).unwrap_err();
        match err {
            LbfgsError::Objective(source) => assert_eq!(source.to_string(), "domain error"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn short_gradients_are_rejected() {
        let mut f = |_: &Array1<f64>| (0.0, array![1.0]);
        assert!(matches!(
            evaluate_checked(&mut f, &array![0.0, 0.0]),
            Err(LbfgsError::DimensionMismatch {
                what: "gradient",
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn diagonal_entries_must_be_positive() {
        let mut f = WithDiagonal::new(bowl, |_: &Array1<f64>| array![0.5, 0.0, 1.0]);
        assert!(matches!(
            caller_diagonal(&mut f, &array![1.0, 1.0, 1.0]),
            Err(LbfgsError::NonPositiveDiagonal { index: 1, .. })
        ));

        let mut f = WithDiagonal::new(bowl, |_: &Array1<f64>| array![0.5, 0.5]);
        assert_eq!(
            caller_diagonal(&mut f, &array![1.0, 1.0]).unwrap(),
            array![0.5, 0.5]
        );
    }

    #[test]
    fn missing_diagonal_is_improper() {
        let mut f = bowl;
        assert!(matches!(
            caller_diagonal(&mut f, &array![1.0]),
            Err(LbfgsError::ImproperInput { .. })
        ));
    }
}
