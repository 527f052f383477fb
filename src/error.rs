//! Define Errors

use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, HodlrError>;

/// Master error type of this crate.
#[derive(Debug, Error)]
pub enum HodlrError {
    /// The compressor oracle could not produce a low-rank factorization
    /// within the allowed rank, or otherwise failed during assembly.
    #[error("assembly failed at node (level {level}, k {k}): {reason}")]
    Assembly {
        level: usize,
        k: usize,
        reason: String,
    },

    /// Symmetric mode requires the two off-diagonal blocks of a node to
    /// share a rank; the oracle returned different ranks for each side.
    #[error(
        "rank mismatch in symmetric mode at node (level {level}, k {k}): r0={r0} != r1={r1}"
    )]
    AsymmetricRank {
        level: usize,
        k: usize,
        r0: usize,
        r1: usize,
    },

    /// A Cholesky or LU primitive reported a non-positive-definite or
    /// singular coupling/diagonal block.
    #[error("singular factor at node (level {level}, k {k})")]
    SingularFactor {
        level: usize,
        k: usize,
        #[source]
        source: ndarray_linalg::error::LinalgError,
    },

    /// The right-hand side passed to `solve`/`matmat` doesn't have N rows.
    #[error("dimension mismatch: expected {expected} rows, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// `solve`/`matmat`/`log_determinant` called before `assemble`/`factorize`,
    /// or `factorize` called twice on the same tree.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}
