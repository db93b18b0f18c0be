//! Per-iteration progress records.

use crate::options::ReportOptions;
use ndarray::Array1;

/// State of the solver after one completed iteration.
///
/// Passed to the callback registered with [`crate::Lbfgs::with_progress`] and,
/// depending on [`ReportOptions`], written to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// Function evaluations so far, including the one at the starting point.
    pub evaluations: usize,
    pub value: f64,
    pub gradient_norm: f64,
    pub point_norm: f64,
    /// Accepted line search step.
    pub step: f64,
    /// Directional derivative `gᵀs` before the line search.
    pub initial_slope: f64,
    /// Directional derivative at the accepted point.
    pub final_slope: f64,
    /// Correction pairs held after this iteration.
    pub corrections: usize,
}

pub(crate) fn log_progress(
    report: &IterationReport,
    options: &ReportOptions,
    x: &Array1<f64>,
    gradient: &Array1<f64>,
) {
    if !options.wants(report.iteration) {
        return;
    }
    log::info!(
        "[L-BFGS] iter {:>5} | nfev {:>6} | f = {:.10e} | ||g|| = {:.3e} | step = {:.3e} | m = {}",
        report.iteration,
        report.evaluations,
        report.value,
        report.gradient_norm,
        report.step,
        report.corrections
    );
    if options.vectors {
        log::debug!("[L-BFGS]   x = {}", x);
        log::debug!("[L-BFGS]   g = {}", gradient);
    }
}
