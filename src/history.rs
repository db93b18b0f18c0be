//! Limited correction history and the two-loop recursion.

use ndarray::Array1;
use std::collections::VecDeque;

/// One stored correction `s = x_{k+1} - x_k`, `y = g_{k+1} - g_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionPair {
    /// The outer iteration that produced this pair (1-based).
    pub iteration: usize,
    pub s: Array1<f64>,
    pub y: Array1<f64>,
    /// `yᵀs`. The approximation is only positive definite while this is positive.
    pub ys: f64,
}

impl CorrectionPair {
    pub fn new(iteration: usize, s: Array1<f64>, y: Array1<f64>) -> Self {
        let ys = y.dot(&s);
        if !(ys > 0.0) {
            log::warn!(
                "[L-BFGS] Non-positive curvature yᵀs = {:.3e} at iteration {}; later directions may not descend.",
                ys,
                iteration
            );
        }
        Self { iteration, s, y, ys }
    }

    pub fn rho(&self) -> f64 {
        1.0 / self.ys
    }

    /// The scalar `yᵀs / yᵀy` used as the default diagonal estimate.
    pub fn scaling(&self) -> f64 {
        self.ys / self.y.dot(&self.y)
    }
}

/// Ring buffer holding the `capacity` most recent correction pairs.
#[derive(Debug, Clone)]
pub struct CorrectionHistory {
    pairs: VecDeque<CorrectionPair>,
    capacity: usize,
}

impl CorrectionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            pairs: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Stores `pair`, returning the evicted oldest pair when the buffer was full.
    pub fn push(&mut self, pair: CorrectionPair) -> Option<CorrectionPair> {
        let evicted = if self.pairs.len() == self.capacity {
            self.pairs.pop_front()
        } else {
            None
        };
        self.pairs.push_back(pair);
        evicted
    }

    pub fn latest(&self) -> Option<&CorrectionPair> {
        self.pairs.back()
    }

    /// Pairs from the most recent to the oldest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CorrectionPair> + ExactSizeIterator {
        self.pairs.iter().rev()
    }

    /// Applies the implicit inverse Hessian to `-gradient`, giving the search direction.
    ///
    /// `diag` is the initial inverse Hessian estimate `H0`. With an empty
    /// history this is the scaled steepest descent direction `-diag .* g`.
    pub fn direction(&self, gradient: &Array1<f64>, diag: &Array1<f64>) -> Array1<f64> {
        let mut q = -gradient;
        let mut alphas = Vec::with_capacity(self.pairs.len());
        for pair in self.iter() {
            let alpha = pair.rho() * pair.s.dot(&q);
            q.scaled_add(-alpha, &pair.y);
            alphas.push(alpha);
        }
        q *= diag;
        // alphas were collected newest first; the forward pass runs oldest first.
        for (pair, alpha) in self.pairs.iter().zip(alphas.iter().rev()) {
            let beta = pair.rho() * pair.y.dot(&q);
            q.scaled_add(alpha - beta, &pair.s);
        }
        q
    }
}
