//! Hierarchically off-diagonal low-rank (HODLR) dense linear solver.
//!
//! A HODLR matrix recursively partitions the index range `[0, N)` in half;
//! at every level, the two off-diagonal blocks created by that split are
//! approximated by a low-rank factorization, while the diagonal blocks
//! recurse until they're small enough to keep dense. This gives an
//! implicit representation of `A` that supports `O(N log N)`-ish
//! matrix-vector products, factorization, solves, and log-determinants
//! without ever materializing the dense `N x N` matrix.
//!
//! The matrix itself is supplied by the caller through a [`MatrixOracle`]
//! — this crate only asks for diagonal blocks and low-rank factorizations
//! of off-diagonal blocks, and never implements a compressor itself.
//!
//! Typical use:
//!
//! ```ignore
//! let mut tree = Tree::<f64>::build(TreeConfig { n, levels, tolerance, is_sym });
//! Assembler::assemble(&mut tree, &oracle)?;
//! let b = tree.matmat(&x)?;           // still valid: bases are untouched
//! tree.factorize()?;                  // bases are now overwritten in place
//! let x = tree.solve(&b)?;
//! let log_det = tree.log_determinant()?;
//! ```

mod assemble;
mod dense;
mod determinant;
mod error;
mod factorize;
mod matmat;
mod node;
mod oracle;
mod solve;
mod tree;
mod types;

pub use assemble::Assembler;
pub use error::{HodlrError, Result};
pub use node::Node;
pub use oracle::MatrixOracle;
pub use tree::{Tree, TreeConfig};
pub use types::Elem;
