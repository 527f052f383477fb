//! Thin call-sites into the dense-linear-algebra collaborator, `ndarray-linalg`.
//!
//! This module does not wrap its traits in a crate-local abstraction
//! (there's nothing to abstract over — we never swap the collaborator
//! out); it only adapts its single-right-hand-side (`Ix1`) solve APIs to
//! the multi-column (`Ix2`) right-hand sides that flow through a HODLR
//! solve, by looping over columns. Everything here is a free function,
//! not a trait — there's no need for the extra indirection.

use ndarray::{Array2, Axis};
use ndarray_linalg::solve::{FactorizeInto, LUFactorized, Solve};
use ndarray_linalg::triangular::{Diag, SolveTriangular};
use ndarray_linalg::{Cholesky, UPLO};

use crate::error::{HodlrError, Result};
use crate::types::Elem;

/// LU-factorize a small dense matrix (a leaf diagonal block or a node's
/// coupling matrix `K`).
pub(crate) fn lu_factorize<A: Elem>(
    a: Array2<A>,
    level: usize,
    k: usize,
) -> Result<LUFactorized<ndarray::OwnedRepr<A>>> {
    a.factorize_into().map_err(|source| HodlrError::SingularFactor { level, k, source })
}

/// Solve `lu * x = b` for every column of `b`.
pub(crate) fn lu_solve<A: Elem>(
    lu: &LUFactorized<ndarray::OwnedRepr<A>>,
    b: &Array2<A>,
    level: usize,
    k: usize,
) -> Result<Array2<A>> {
    let mut out = Array2::zeros(b.raw_dim());
    for (mut out_col, in_col) in out.axis_iter_mut(Axis(1)).zip(b.axis_iter(Axis(1))) {
        let mut col = in_col.to_owned();
        lu.solve_inplace(&mut col)
            .map_err(|source| HodlrError::SingularFactor { level, k, source })?;
        out_col.assign(&col);
    }
    Ok(out)
}

/// Lower-triangular Cholesky factor `L` such that `a = L * L^T`.
pub(crate) fn cholesky_factorize<A: Elem>(a: &Array2<A>, level: usize, k: usize) -> Result<Array2<A>> {
    a.cholesky(UPLO::Lower)
        .map_err(|source| HodlrError::SingularFactor { level, k, source })
}

/// Solve `L * L^T * x = b` given the lower Cholesky factor `l`, for every
/// column of `b`.
pub(crate) fn cholesky_solve<A: Elem>(
    l: &Array2<A>,
    b: &Array2<A>,
    level: usize,
    k: usize,
) -> Result<Array2<A>> {
    let mut out = Array2::zeros(b.raw_dim());
    for (mut out_col, in_col) in out.axis_iter_mut(Axis(1)).zip(b.axis_iter(Axis(1))) {
        let rhs = in_col.to_owned();
        let y = l
            .solve_triangular(UPLO::Lower, Diag::NonUnit, &rhs)
            .map_err(|source| HodlrError::SingularFactor { level, k, source })?;
        let x = l
            .t()
            .solve_triangular(UPLO::Upper, Diag::NonUnit, &y)
            .map_err(|source| HodlrError::SingularFactor { level, k, source })?;
        out_col.assign(&x);
    }
    Ok(out)
}

/// Forward-solve `l * x = b` only (no back-substitution), used by the
/// symmetric factorization's `L^{-1}` left-multiplication.
pub(crate) fn triangular_lower_solve<A: Elem>(
    l: &Array2<A>,
    b: &Array2<A>,
    level: usize,
    k: usize,
) -> Result<Array2<A>> {
    let mut out = Array2::zeros(b.raw_dim());
    for (mut out_col, in_col) in out.axis_iter_mut(Axis(1)).zip(b.axis_iter(Axis(1))) {
        let rhs = in_col.to_owned();
        let x = l
            .solve_triangular(UPLO::Lower, Diag::NonUnit, &rhs)
            .map_err(|source| HodlrError::SingularFactor { level, k, source })?;
        out_col.assign(&x);
    }
    Ok(out)
}
