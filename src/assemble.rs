//! Populate a built [`Tree`]'s nodes from the matrix oracle.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::instrument;

use crate::error::{HodlrError, Result};
use crate::node::{Basis, Node, NodeKind};
use crate::oracle::MatrixOracle;
use crate::tree::Tree;
use crate::types::Elem;

/// Stateless: assembly only ever reads the oracle and writes into the
/// tree's own nodes, so there's nothing to hold across calls.
pub struct Assembler;

impl Assembler {
    /// Assemble every node of `tree` against `oracle` at `tree`'s
    /// configured tolerance and symmetry mode. Assembly across siblings is
    /// independent: each level's nodes are populated with `rayon`,
    /// non-leaf levels top-down then leaves.
    #[instrument(skip_all, level = "debug", name = "Assembler::assemble")]
    pub fn assemble<A: Elem>(tree: &mut Tree<A>, oracle: &dyn MatrixOracle<A>) -> Result<()> {
        if oracle.n() != tree.n() {
            return Err(HodlrError::DimensionMismatch { expected: tree.n(), got: oracle.n() });
        }

        let is_sym = tree.is_sym();
        let tolerance = tree.config.tolerance;

        for level in 0..tree.levels() {
            tree.nodes_at_mut(level)
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(k, node)| assemble_nonleaf(node, oracle, tolerance, is_sym, level, k))?;
        }

        let leaf_level = tree.levels();
        tree.nodes_at_mut(leaf_level)
            .par_iter_mut()
            .for_each(|node| assemble_leaf(node, oracle));

        tree.assembled = true;
        tree.factored = false;
        Ok(())
    }
}

fn assemble_nonleaf<A: Elem>(
    node: &mut Node<A>,
    oracle: &dyn MatrixOracle<A>,
    tolerance: f64,
    is_sym: bool,
    level: usize,
    k: usize,
) -> Result<()> {
    let NodeKind::Branch { c_start, c_size, rank, basis, k: kmat, .. } = &mut node.kind else {
        unreachable!("non-leaf level holds only branches");
    };

    if is_sym {
        let (q0, q1) = oracle
            .low_rank_sym(
                c_start[0]..c_start[0] + c_size[0],
                c_start[1]..c_start[1] + c_size[1],
                tolerance,
            )
            .map_err(|e| annotate(e, level, k))?;
        let (r0, r1) = (q0.ncols(), q1.ncols());
        if r0 != r1 {
            return Err(HodlrError::AsymmetricRank { level, k, r0, r1 });
        }
        *rank = [r0, r1];
        *kmat = Array2::eye(r0);
        *basis = Basis::Sym { q: [q0, q1], q_factor: [Array2::zeros((0, 0)), Array2::zeros((0, 0))] };
    } else {
        let (u0, v0) = oracle
            .low_rank_nonsym(
                c_start[0]..c_start[0] + c_size[0],
                c_start[1]..c_start[1] + c_size[1],
                tolerance,
            )
            .map_err(|e| annotate(e, level, k))?;
        let (u1, v1) = oracle
            .low_rank_nonsym(
                c_start[1]..c_start[1] + c_size[1],
                c_start[0]..c_start[0] + c_size[0],
                tolerance,
            )
            .map_err(|e| annotate(e, level, k))?;
        let (r0, r1) = (u0.ncols(), u1.ncols());
        *rank = [r0, r1];
        *kmat = Array2::eye(r0 + r1);
        // `v[i]` pairs with `u[1 - i]`, not `u[i]`: `A[c0,c1] ~= u[0] * v[1]^T`
        // and `A[c1,c0] ~= u[1] * v[0]^T`, since `v[i]`'s row count must match
        // the *other* child's size to pair with that child's row basis.
        *basis = Basis::Nonsym {
            u: [u0, u1],
            v: [v1, v0],
            u_factor: [Array2::zeros((0, 0)), Array2::zeros((0, 0))],
            v_factor: [Array2::zeros((0, 0)), Array2::zeros((0, 0))],
        };
    }
    Ok(())
}

fn assemble_leaf<A: Elem>(node: &mut Node<A>, oracle: &dyn MatrixOracle<A>) {
    let NodeKind::Leaf { k, factor } = &mut node.kind else {
        unreachable!("leaf level holds only leaves");
    };
    *k = oracle.diagonal_block(node.n_start, node.n_size);
    *factor = None;
}

/// If the oracle's own error carries no node coordinates, stamp on the
/// originating node's level/index so the caller can locate it.
fn annotate(err: HodlrError, level: usize, k: usize) -> HodlrError {
    match err {
        HodlrError::Assembly { reason, .. } => HodlrError::Assembly { level, k, reason },
        other => other,
    }
}
