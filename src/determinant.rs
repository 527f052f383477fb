//! Log-determinant from the factored tree's triangular diagonals.

use num_traits::Zero;
use rayon::prelude::*;
use tracing::instrument;

use crate::error::{HodlrError, Result};
use crate::tree::Tree;
use crate::types::Elem;

impl<A: Elem> Tree<A> {
    /// `log|det(A)|`, accumulated from every node's factor (leaves and
    /// non-leaves alike). Symmetric mode's Cholesky factors contribute
    /// `log|det(L)|` each but `det(A) = det(L)^2`, so the running total is
    /// doubled once at the end rather than per node.
    #[instrument(skip_all, level = "debug", name = "Tree::log_determinant")]
    pub fn log_determinant(&self) -> Result<A::Real> {
        if !self.factored {
            return Err(HodlrError::InvalidState("log_determinant called before factorize"));
        }

        let mut total = A::Real::zero();
        for level in 0..=self.levels() {
            let level_sum: A::Real = self
                .nodes_at(level)
                .par_iter()
                .map(|node| {
                    node.factor().map(|f| f.log_abs_diag_sum()).unwrap_or_else(A::Real::zero)
                })
                .reduce(A::Real::zero, |a, b| a + b);
            total = total + level_sum;
        }

        if self.is_sym() {
            total = total + total;
        }
        Ok(total)
    }
}
