//! Recursive one-sided factorization `A = M_0 * M_1 * ... * M_L * R`.
//!
//! Leaves factorize first; each level's nodes then fold their own small
//! factorization into every strict ancestor's working basis, by bit-shift
//! address (`crate::tree::ancestor_index`/`child_slot`) rather than stored
//! parent pointers. Per-node updates are computed in parallel (`rayon`)
//! and then applied with a short sequential pass — the updates for
//! different nodes at one level target disjoint row ranges of each
//! ancestor's basis, so the sequential apply is cheap, and this sidesteps
//! needing `unsafe` to hand out disjoint `&mut` slices of the same
//! ancestor array to concurrent workers.

use ndarray::{s, Array2};
use ndarray_linalg::qr::QRInto;
use rayon::prelude::*;
use tracing::instrument;

use crate::dense;
use crate::error::{HodlrError, Result};
use crate::node::{Basis, Factor, NodeKind};
use crate::tree::{ancestor_index, child_slot, Tree};
use crate::types::Elem;

struct BasisUpdate<A: Elem> {
    level: usize,
    k: usize,
    child: usize,
    offset: usize,
    height: usize,
    new_block: Array2<A>,
}

impl<A: Elem> Tree<A> {
    /// Factorize the (assembled) tree in place. Consecutive calls without
    /// an intervening `assemble` are rejected rather than silently
    /// re-factorizing an already-factored tree.
    #[instrument(skip_all, level = "debug", name = "Tree::factorize", fields(is_sym = self.is_sym()))]
    pub fn factorize(&mut self) -> Result<()> {
        if !self.assembled {
            return Err(HodlrError::InvalidState("factorize called before assemble"));
        }
        if self.factored {
            return Err(HodlrError::InvalidState("factorize called twice on the same tree"));
        }

        init_factor_fields(self);
        leaf_step(self)?;

        let levels = self.levels();
        if self.is_sym() && levels > 0 {
            qr_for_level(self, levels - 1);
        }

        for level in (0..levels).rev() {
            nonleaf_level_step(self, level)?;
            if self.is_sym() && level > 0 {
                qr_for_level(self, level - 1);
            }
        }

        self.factored = true;
        Ok(())
    }
}

/// Copy the static bases into the working (`*_factor`) copies and reset
/// each non-leaf node's coupling matrix to identity.
fn init_factor_fields<A: Elem>(tree: &mut Tree<A>) {
    let levels = tree.levels();
    for level in 0..levels {
        tree.nodes_at_mut(level).par_iter_mut().for_each(|node| {
            let NodeKind::Branch { rank, basis, k, .. } = &mut node.kind else {
                unreachable!("non-leaf level holds only branches");
            };
            match basis {
                Basis::Sym { q, q_factor } => {
                    q_factor[0] = q[0].clone();
                    q_factor[1] = q[1].clone();
                    *k = Array2::eye(rank[0]);
                }
                Basis::Nonsym { u, v, u_factor, v_factor } => {
                    u_factor[0] = u[0].clone();
                    u_factor[1] = u[1].clone();
                    v_factor[0] = v[0].clone();
                    v_factor[1] = v[1].clone();
                    *k = Array2::eye(rank[0] + rank[1]);
                }
            }
        });
    }
}

/// Factorize every leaf's dense block, then left-multiply the
/// corresponding rows of every strict ancestor's working basis by the
/// leaf factor's inverse.
fn leaf_step<A: Elem>(tree: &mut Tree<A>) -> Result<()> {
    let is_sym = tree.is_sym();
    let leaf_level = tree.levels();

    tree.nodes_at_mut(leaf_level)
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(k, node)| -> Result<()> {
            let NodeKind::Leaf { k: kmat, factor } = &mut node.kind else {
                unreachable!("leaf level holds only leaves");
            };
            *factor = Some(if is_sym {
                Factor::Cholesky(dense::cholesky_factorize(kmat, leaf_level, k)?)
            } else {
                Factor::Lu(dense::lu_factorize(kmat.clone(), leaf_level, k)?)
            });
            Ok(())
        })?;

    let updates: Vec<BasisUpdate<A>> = tree
        .nodes_at(leaf_level)
        .par_iter()
        .enumerate()
        .map(|(k, leaf)| -> Result<Vec<BasisUpdate<A>>> {
            let factor = leaf.factor().expect("just factorized above");
            let mut out = Vec::new();
            for l in (0..leaf_level).rev() {
                let parent = ancestor_index(k, leaf_level, l);
                let child = child_slot(k, leaf_level, l);
                let ancestor = &tree.nodes_at(l)[parent];
                let NodeKind::Branch { c_start, rank, basis, .. } = &ancestor.kind else {
                    unreachable!("non-leaf level holds only branches");
                };
                let r = rank[child];
                if r == 0 {
                    continue;
                }
                let offset = leaf.n_start - c_start[child];
                let height = leaf.n_size;
                let block = basis_block(basis, child, offset, height);
                let new_block = factor.solve(&block, leaf_level, k)?;
                out.push(BasisUpdate { level: l, k: parent, child, offset, height, new_block });
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    apply_updates(tree, updates);
    Ok(())
}

/// Non-leaf factorization step, unified across symmetric/nonsymmetric and
/// across the root: every non-leaf node's factor must be valid once
/// factorization completes (`solve` and `log_determinant` both walk every
/// level), so this runs for every non-leaf level including the root. At
/// the root the ancestor loop below is empty (there is no strict ancestor
/// of level 0), so the root case falls out of the general loop with no
/// extra branch.
fn nonleaf_level_step<A: Elem>(tree: &mut Tree<A>, level: usize) -> Result<()> {
    let is_sym = tree.is_sym();

    tree.nodes_at_mut(level)
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(k, node)| -> Result<()> {
            let NodeKind::Branch { rank, basis, k: kmat, factor, .. } = &mut node.kind else {
                unreachable!("non-leaf level holds only branches");
            };
            if is_sym {
                let r = rank[0];
                let to_factor = Array2::eye(r) - kmat.t().dot(kmat);
                *factor = Some(Factor::Cholesky(dense::cholesky_factorize(&to_factor, level, k)?));
            } else {
                let (r0, r1) = (rank[0], rank[1]);
                if r0 > 0 || r1 > 0 {
                    let Basis::Nonsym { u_factor, v_factor, .. } = basis else {
                        unreachable!("nonsymmetric tree holds Nonsym bases");
                    };
                    let top = v_factor[1].t().dot(&u_factor[1]);
                    let bottom = v_factor[0].t().dot(&u_factor[0]);
                    kmat.slice_mut(s![0..r0, r0..r0 + r1]).assign(&top);
                    kmat.slice_mut(s![r0..r0 + r1, 0..r0]).assign(&bottom);
                    *factor = Some(Factor::Lu(dense::lu_factorize(kmat.clone(), level, k)?));
                }
            }
            Ok(())
        })?;

    let updates: Vec<BasisUpdate<A>> = tree
        .nodes_at(level)
        .par_iter()
        .enumerate()
        .map(|(k, node)| -> Result<Vec<BasisUpdate<A>>> {
            let NodeKind::Branch { c_size, rank, basis, k: coupling, factor, .. } = &node.kind else {
                unreachable!("non-leaf level holds only branches");
            };
            let Some(factor) = factor else {
                // r0 == r1 == 0: nothing was factorized, nothing to propagate.
                return Ok(Vec::new());
            };
            let mut out = Vec::new();
            for l in (0..level).rev() {
                let parent = ancestor_index(k, level, l);
                let child = child_slot(k, level, l);
                let ancestor = &tree.nodes_at(l)[parent];
                let NodeKind::Branch { c_start: anc_c_start, rank: anc_rank, basis: anc_basis, .. } =
                    &ancestor.kind
                else {
                    unreachable!("non-leaf level holds only branches");
                };
                if anc_rank[child] == 0 {
                    continue;
                }
                let offset = node.n_start - anc_c_start[child];
                let height = node.n_size;
                let block = basis_block(anc_basis, child, offset, height);
                if block.ncols() == 0 {
                    continue;
                }
                let new_block = solve_nonleaf(*c_size, *rank, basis, coupling, factor, &block, level, k)?;
                out.push(BasisUpdate { level: l, k: parent, child, offset, height, new_block });
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    apply_updates(tree, updates);
    Ok(())
}

/// The non-leaf update operator, applied here to an ancestor's basis
/// slice during factorization (the same operator is reused by `solve`,
/// see `src/solve.rs`). `coupling` is the node's own (unfactorized) `K`
/// — in symmetric mode this is distinct from its Cholesky factor, since
/// the non-leaf step Cholesky-factorizes `I - K^T K` without overwriting
/// `K` itself.
pub(crate) fn solve_nonleaf<A: Elem>(
    c_size: [usize; 2],
    rank: [usize; 2],
    basis: &Basis<A>,
    coupling: &Array2<A>,
    factor: &Factor<A>,
    b: &Array2<A>,
    level: usize,
    k: usize,
) -> Result<Array2<A>> {
    match basis {
        Basis::Nonsym { u_factor, v_factor, .. } => {
            solve_nonleaf_nonsym(c_size, rank, u_factor, v_factor, factor, b, level, k)
        }
        Basis::Sym { q_factor, .. } => {
            let Factor::Cholesky(l) = factor else {
                unreachable!("symmetric coupling is always Cholesky-factored");
            };
            solve_nonleaf_sym(c_size, q_factor, coupling, l, b, level, k)
        }
    }
}

fn solve_nonleaf_nonsym<A: Elem>(
    c_size: [usize; 2],
    rank: [usize; 2],
    u_factor: &[Array2<A>; 2],
    v_factor: &[Array2<A>; 2],
    factor: &Factor<A>,
    b: &Array2<A>,
    level: usize,
    k: usize,
) -> Result<Array2<A>> {
    let (n0, n1) = (c_size[0], c_size[1]);
    let (r0, r1) = (rank[0], rank[1]);
    let cols = b.ncols();

    let b0 = b.slice(s![0..n0, ..]);
    let b1 = b.slice(s![n0..n0 + n1, ..]);

    // `top` pairs with `u_factor[0]` (rank `r0`) after the solve below, so
    // it occupies the first `r0` rows of `t`; `bottom` pairs with
    // `u_factor[1]` (rank `r1`) and occupies the remaining `r1` rows —
    // matching the row/column convention the coupling matrix's
    // off-diagonal blocks were filled in with during the non-leaf
    // factorization step.
    let top = v_factor[1].t().dot(&b1);
    let bottom = v_factor[0].t().dot(&b0);
    let mut t = Array2::zeros((r0 + r1, cols));
    t.slice_mut(s![0..r0, ..]).assign(&top);
    t.slice_mut(s![r0..r0 + r1, ..]).assign(&bottom);

    let z = factor.solve(&t, level, k)?;
    let y0 = u_factor[0].dot(&z.slice(s![0..r0, ..]));
    let y1 = u_factor[1].dot(&z.slice(s![r0..r0 + r1, ..]));
    let mut y = Array2::zeros((n0 + n1, cols));
    y.slice_mut(s![0..n0, ..]).assign(&y0);
    y.slice_mut(s![n0..n0 + n1, ..]).assign(&y1);

    Ok(b - &y)
}

/// The symmetric non-leaf update operator: `tmp` is shared between the
/// subtraction and the addition, which is the correct expansion of
/// `(I - K^T K)^{-1}` applied to the stacked basis projection via its
/// Cholesky factor `l`.
fn solve_nonleaf_sym<A: Elem>(
    c_size: [usize; 2],
    q_factor: &[Array2<A>; 2],
    coupling: &Array2<A>,
    l: &Array2<A>,
    b: &Array2<A>,
    level: usize,
    k: usize,
) -> Result<Array2<A>> {
    let (n0, n1) = (c_size[0], c_size[1]);
    let b0 = b.slice(s![0..n0, ..]).to_owned();
    let mut b1 = b.slice(s![n0..n0 + n1, ..]).to_owned();

    let tmp = q_factor[1].t().dot(&b1);
    let projected = coupling.t().dot(&q_factor[0].t().dot(&b0)) - &tmp;
    let l_inv_projected = dense::triangular_lower_solve(l, &projected, level, k)?;
    let correction = q_factor[1].dot(&(l_inv_projected + &tmp));
    b1 -= &correction;

    let mut out = b.clone();
    out.slice_mut(s![n0..n0 + n1, ..]).assign(&b1);
    Ok(out)
}

fn basis_block<A: Elem>(basis: &Basis<A>, child: usize, offset: usize, height: usize) -> Array2<A> {
    match basis {
        Basis::Sym { q_factor, .. } => q_factor[child].slice(s![offset..offset + height, ..]).to_owned(),
        Basis::Nonsym { u_factor, .. } => u_factor[child].slice(s![offset..offset + height, ..]).to_owned(),
    }
}

fn apply_updates<A: Elem>(tree: &mut Tree<A>, updates: Vec<BasisUpdate<A>>) {
    for u in updates {
        let node = &mut tree.nodes[u.level][u.k];
        let NodeKind::Branch { basis, .. } = &mut node.kind else {
            unreachable!("non-leaf level holds only branches");
        };
        let target = match basis {
            Basis::Sym { q_factor, .. } => &mut q_factor[u.child],
            Basis::Nonsym { u_factor, .. } => &mut u_factor[u.child],
        };
        target.slice_mut(s![u.offset..u.offset + u.height, ..]).assign(&u.new_block);
    }
}

/// Symmetric QR repass: orthogonalize both children's bases at `level`
/// and fold the triangular factors into `K`.
fn qr_for_level<A: Elem>(tree: &mut Tree<A>, level: usize) {
    tree.nodes_at_mut(level).par_iter_mut().for_each(|node| {
        let NodeKind::Branch { basis, k, .. } = &mut node.kind else {
            unreachable!("non-leaf level holds only branches");
        };
        let Basis::Sym { q_factor, .. } = basis else {
            unreachable!("qr_for_level only runs in symmetric mode");
        };
        if q_factor[0].ncols() == 0 {
            return;
        }
        let (q0, r0) = std::mem::replace(&mut q_factor[0], Array2::zeros((0, 0)))
            .qr_into()
            .expect("QR of a working basis cannot fail for a well-formed tree");
        q_factor[0] = q0;
        *k = k.dot(&r0);

        let (q1, r1) = std::mem::replace(&mut q_factor[1], Array2::zeros((0, 0)))
            .qr_into()
            .expect("QR of a working basis cannot fail for a well-formed tree");
        q_factor[1] = q1;
        *k = k.dot(&r1.t());
    });
}
