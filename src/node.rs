//! A vertex of the HODLR tree.
//!
//! Symmetric and nonsymmetric modes keep different fields alive (`Q` vs.
//! `U`/`V`, rank-`r` vs. rank-`(r0+r1)` coupling matrices, presence of a QR
//! repass), so this is modeled as a tagged variant rather than one struct
//! carrying always-half-unused fields.

use ndarray::{Array2, OwnedRepr};
use ndarray_linalg::solve::LUFactorized;
use num_traits::Zero;

use crate::dense;
use crate::error::Result;
use crate::types::Elem;

/// The two off-diagonal low-rank bases of a non-leaf node.
pub(crate) enum Basis<A: Elem> {
    /// `A[c0, c1] ~= Q[0] * K * Q[1]^T`, `A[c1, c0] = A[c0, c1]^T`.
    Sym { q: [Array2<A>; 2], q_factor: [Array2<A>; 2] },
    /// `A[c0, c1] ~= U[0] * V[1]^T`, `A[c1, c0] ~= U[1] * V[0]^T` — `V[i]`
    /// carries the rank of the *other* child's block, so its row count
    /// matches child `i`'s own size while its column count matches
    /// `rank[1 - i]`.
    Nonsym {
        u: [Array2<A>; 2],
        v: [Array2<A>; 2],
        u_factor: [Array2<A>; 2],
        v_factor: [Array2<A>; 2],
    },
}

/// A factorization of a node's dense `K` (leaf diagonal block, or non-leaf
/// coupling matrix).
pub(crate) enum Factor<A: Elem> {
    Cholesky(Array2<A>),
    Lu(LUFactorized<OwnedRepr<A>>),
}

impl<A: Elem> Factor<A> {
    pub(crate) fn solve(&self, b: &Array2<A>, level: usize, k: usize) -> Result<Array2<A>> {
        match self {
            Factor::Cholesky(l) => dense::cholesky_solve(l, b, level, k),
            Factor::Lu(lu) => dense::lu_solve(lu, b, level, k),
        }
    }

    /// Sum of `log(|diagonal entry|)` of the triangular factor. Symmetric
    /// contributions are doubled by the caller (this returns the `L`
    /// contribution only, once).
    pub(crate) fn log_abs_diag_sum(&self) -> A::Real {
        let diag_abs_log = |a: &Array2<A>| {
            let mut acc = A::Real::zero();
            for i in 0..a.nrows().min(a.ncols()) {
                acc = acc + a[(i, i)].abs().ln();
            }
            acc
        };
        match self {
            Factor::Cholesky(l) => diag_abs_log(l),
            Factor::Lu(lu) => diag_abs_log(&lu.a),
        }
    }
}

pub(crate) enum NodeKind<A: Elem> {
    Leaf {
        k: Array2<A>,
        factor: Option<Factor<A>>,
    },
    Branch {
        c_start: [usize; 2],
        c_size: [usize; 2],
        rank: [usize; 2],
        basis: Basis<A>,
        k: Array2<A>,
        factor: Option<Factor<A>>,
    },
}

/// A vertex of the tree: an index range plus whatever data a leaf vs. a
/// non-leaf needs.
pub struct Node<A: Elem> {
    pub(crate) n_start: usize,
    pub(crate) n_size: usize,
    pub(crate) kind: NodeKind<A>,
}

impl<A: Elem> Node<A> {
    pub(crate) fn new_branch_placeholder(n_start: usize, n_size: usize, c_start: [usize; 2], c_size: [usize; 2]) -> Self {
        Node {
            n_start,
            n_size,
            kind: NodeKind::Branch {
                c_start,
                c_size,
                rank: [0, 0],
                basis: Basis::Nonsym {
                    u: [Array2::zeros((0, 0)), Array2::zeros((0, 0))],
                    v: [Array2::zeros((0, 0)), Array2::zeros((0, 0))],
                    u_factor: [Array2::zeros((0, 0)), Array2::zeros((0, 0))],
                    v_factor: [Array2::zeros((0, 0)), Array2::zeros((0, 0))],
                },
                k: Array2::zeros((0, 0)),
                factor: None,
            },
        }
    }

    pub(crate) fn new_leaf_placeholder(n_start: usize, n_size: usize) -> Self {
        Node {
            n_start,
            n_size,
            kind: NodeKind::Leaf { k: Array2::zeros((0, 0)), factor: None },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub(crate) fn factor(&self) -> Option<&Factor<A>> {
        match &self.kind {
            NodeKind::Leaf { factor, .. } => factor.as_ref(),
            NodeKind::Branch { factor, .. } => factor.as_ref(),
        }
    }
}
