//! The externally supplied matrix object.
//!
//! Everything in this module is a collaborator interface: this crate never
//! implements a compressor. Callers supply an oracle over their matrix `A`
//! (dense, a kernel, an assembled sparse operator, whatever) and this crate
//! only ever asks it for diagonal blocks and low-rank factorizations of
//! off-diagonal blocks.

use std::ops::Range;

use ndarray::Array2;

use crate::error::Result;
use crate::types::Elem;

/// Capabilities required of the matrix being factorized.
///
/// `Sync` is required because assembly shares `&dyn MatrixOracle<A>` across
/// the `rayon` worker pool used to assemble a level's nodes in parallel.
pub trait MatrixOracle<A: Elem>: Sync {
    /// Size of the (square) matrix.
    fn n(&self) -> usize;

    /// `A[start..start+size, start..start+size]`.
    fn diagonal_block(&self, start: usize, size: usize) -> Array2<A>;

    /// `A[start..start+size, cols]`, used by the external compressor.
    fn row_indexed(&self, start: usize, size: usize, cols: &[usize]) -> Array2<A>;

    /// `A[rows, start..start+size]`, used by the external compressor.
    fn col_indexed(&self, rows: &[usize], start: usize, size: usize) -> Array2<A>;

    /// Rank-`r` factorization of `A[rows, cols]` as `U * V^T` with
    /// relative error `<= tolerance`. Used in nonsymmetric mode.
    fn low_rank_nonsym(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
        tolerance: f64,
    ) -> Result<(Array2<A>, Array2<A>)>;

    /// Rank-`r` factorization of `A[rows, cols]` as `Q_left * Q_right^T`
    /// with orthonormal-ready bases and relative error `<= tolerance`.
    /// Used in symmetric mode; callers must guarantee the returned bases
    /// have matching rank for `A[rows, cols]` and its transpose.
    fn low_rank_sym(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
        tolerance: f64,
    ) -> Result<(Array2<A>, Array2<A>)>;
}
