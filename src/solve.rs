//! Apply the factorized tree's implicit inverse to a right-hand side.

use ndarray::{s, Array2};
use rayon::prelude::*;
use tracing::instrument;

use crate::error::{HodlrError, Result};
use crate::factorize::solve_nonleaf;
use crate::node::NodeKind;
use crate::tree::Tree;
use crate::types::Elem;

impl<A: Elem> Tree<A> {
    /// Solve `A * X = B` using the factored form, returning a new array.
    #[instrument(skip_all, level = "debug", name = "Tree::solve")]
    pub fn solve(&self, b: &Array2<A>) -> Result<Array2<A>> {
        let mut x = b.clone();
        self.solve_into(&mut x)?;
        Ok(x)
    }

    /// Same as [`Tree::solve`], overwriting `b` in place instead of
    /// allocating a fresh result.
    #[instrument(skip_all, level = "debug", name = "Tree::solve_into")]
    pub fn solve_into(&self, b: &mut Array2<A>) -> Result<()> {
        if !self.factored {
            return Err(HodlrError::InvalidState("solve called before factorize"));
        }
        if b.nrows() != self.n() {
            return Err(HodlrError::DimensionMismatch { expected: self.n(), got: b.nrows() });
        }

        let leaf_level = self.levels();
        let leaf_updates: Vec<(usize, usize, Array2<A>)> = self
            .nodes_at(leaf_level)
            .par_iter()
            .enumerate()
            .map(|(k, node)| -> Result<(usize, usize, Array2<A>)> {
                let factor = node.factor().expect("factorize populates every leaf's factor");
                let rhs = b.slice(s![node.n_start..node.n_start + node.n_size, ..]).to_owned();
                let solved = factor.solve(&rhs, leaf_level, k)?;
                Ok((node.n_start, node.n_size, solved))
            })
            .collect::<Result<Vec<_>>>()?;
        apply(b, leaf_updates);

        for level in (0..leaf_level).rev() {
            let updates: Vec<(usize, usize, Array2<A>)> = self
                .nodes_at(level)
                .par_iter()
                .enumerate()
                .map(|(k, node)| -> Result<(usize, usize, Array2<A>)> {
                    let NodeKind::Branch { c_size, rank, basis, k: coupling, factor, .. } = &node.kind
                    else {
                        unreachable!("non-leaf level holds only branches");
                    };
                    let rhs = b.slice(s![node.n_start..node.n_start + node.n_size, ..]).to_owned();
                    let solved = match factor {
                        Some(factor) => solve_nonleaf(*c_size, *rank, basis, coupling, factor, &rhs, level, k)?,
                        None => rhs,
                    };
                    Ok((node.n_start, node.n_size, solved))
                })
                .collect::<Result<Vec<_>>>()?;
            apply(b, updates);
        }

        Ok(())
    }
}

fn apply<A: Elem>(b: &mut Array2<A>, updates: Vec<(usize, usize, Array2<A>)>) {
    for (row, len, value) in updates {
        b.slice_mut(s![row..row + len, ..]).assign(&value);
    }
}
