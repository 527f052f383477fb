//! Matrix-dense-matrix product `B = A * X`.

use ndarray::{s, Array2};
use rayon::prelude::*;
use tracing::instrument;

use crate::error::{HodlrError, Result};
use crate::node::{Basis, NodeKind};
use crate::tree::Tree;
use crate::types::Elem;

/// One node's contribution to `B`: an additive update to `B[row..row+len, :]`.
struct Contribution<A: Elem> {
    row: usize,
    len: usize,
    value: Array2<A>,
}

impl<A: Elem> Tree<A> {
    /// Apply the (implicit) HODLR form of `A` to a dense right-hand side,
    /// returning `B = A * X`. Does not require factorization — only
    /// assembly — so it remains valid for the round-trip testable property
    /// even though `factorize` mutates the working bases in place.
    #[instrument(skip_all, level = "debug", name = "Tree::matmat")]
    pub fn matmat(&self, x: &Array2<A>) -> Result<Array2<A>> {
        if !self.assembled {
            return Err(HodlrError::InvalidState("matmat called before assemble"));
        }
        if x.nrows() != self.n() {
            return Err(HodlrError::DimensionMismatch { expected: self.n(), got: x.nrows() });
        }

        let mut b = Array2::zeros((self.n(), x.ncols()));

        for level in 0..self.levels() {
            let contributions: Vec<Contribution<A>> = self
                .nodes_at(level)
                .par_iter()
                .flat_map_iter(|node| nonleaf_contributions(node, x).into_iter())
                .collect();
            apply(&mut b, contributions);
        }

        let leaf_contributions: Vec<Contribution<A>> = self
            .nodes_at(self.levels())
            .par_iter()
            .map(|node| leaf_contribution(node, x))
            .collect();
        apply(&mut b, leaf_contributions);

        Ok(b)
    }
}

fn apply<A: Elem>(b: &mut Array2<A>, contributions: Vec<Contribution<A>>) {
    for c in contributions {
        let mut dst = b.slice_mut(s![c.row..c.row + c.len, ..]);
        dst += &c.value;
    }
}

fn leaf_contribution<A: Elem>(node: &crate::node::Node<A>, x: &Array2<A>) -> Contribution<A> {
    match &node.kind {
        NodeKind::Leaf { k, .. } => {
            let xs = x.slice(s![node.n_start..node.n_start + node.n_size, ..]);
            Contribution { row: node.n_start, len: node.n_size, value: k.dot(&xs) }
        }
        NodeKind::Branch { .. } => unreachable!("leaf level holds only leaves"),
    }
}

fn nonleaf_contributions<A: Elem>(node: &crate::node::Node<A>, x: &Array2<A>) -> Vec<Contribution<A>> {
    let (c_start, c_size, k, basis) = match &node.kind {
        NodeKind::Branch { c_start, c_size, k, basis, .. } => (*c_start, *c_size, k, basis),
        NodeKind::Leaf { .. } => return Vec::new(),
    };
    if c_size[0] == 0 || c_size[1] == 0 {
        return Vec::new();
    }

    let x1 = x.slice(s![c_start[1]..c_start[1] + c_size[1], ..]);
    let x0 = x.slice(s![c_start[0]..c_start[0] + c_size[0], ..]);

    let (upper, lower) = match basis {
        Basis::Nonsym { u, v, .. } => {
            let upper = if u[0].ncols() == 0 { None } else { Some(u[0].dot(&v[0].t().dot(&x1))) };
            let lower = if u[1].ncols() == 0 { None } else { Some(u[1].dot(&v[1].t().dot(&x0))) };
            (upper, lower)
        }
        Basis::Sym { q, .. } => {
            let upper = if q[0].ncols() == 0 {
                None
            } else {
                Some(q[0].dot(&k.dot(&q[1].t().dot(&x1))))
            };
            let lower = if q[1].ncols() == 0 {
                None
            } else {
                Some(q[1].dot(&k.t().dot(&q[0].t().dot(&x0))))
            };
            (upper, lower)
        }
    };

    let mut out = Vec::with_capacity(2);
    if let Some(value) = upper {
        out.push(Contribution { row: c_start[0], len: c_size[0], value });
    }
    if let Some(value) = lower {
        out.push(Contribution { row: c_start[1], len: c_size[1], value });
    }
    out
}
