//! Integration tests for the six concrete scenarios and the testable
//! properties they instantiate.

use approx::assert_relative_eq;
use ndarray::{s, Array2, Axis};
use ndarray_linalg::{Determinant, Solve, SVD};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use hodlr::{Assembler, HodlrError, MatrixOracle, Result, Tree, TreeConfig};

/// A dense, in-memory reference matrix. Off-diagonal compression is a
/// plain truncated SVD — realistic compressors would exploit structure
/// (kernel smoothness, ACA, ...), but this is enough to exercise the
/// tree machinery against a known-correct dense matrix.
struct DenseOracle {
    a: Array2<f64>,
}

impl DenseOracle {
    fn new(a: Array2<f64>) -> Self {
        assert_eq!(a.nrows(), a.ncols());
        DenseOracle { a }
    }

    fn block(&self, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Array2<f64> {
        self.a.slice(s![rows.start..rows.end, cols.start..cols.end]).to_owned()
    }
}

impl MatrixOracle<f64> for DenseOracle {
    fn n(&self) -> usize {
        self.a.nrows()
    }

    fn diagonal_block(&self, start: usize, size: usize) -> Array2<f64> {
        self.a.slice(s![start..start + size, start..start + size]).to_owned()
    }

    fn row_indexed(&self, start: usize, size: usize, cols: &[usize]) -> Array2<f64> {
        self.a.slice(s![start..start + size, ..]).select(Axis(1), cols)
    }

    fn col_indexed(&self, rows: &[usize], start: usize, size: usize) -> Array2<f64> {
        self.a.slice(s![.., start..start + size]).select(Axis(0), rows)
    }

    fn low_rank_nonsym(
        &self,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
        tolerance: f64,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        truncated_svd(&self.block(rows, cols), tolerance, false)
    }

    fn low_rank_sym(
        &self,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
        tolerance: f64,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        truncated_svd(&self.block(rows, cols), tolerance, true)
    }
}

/// Truncate a block's SVD at `tolerance` relative to its largest singular
/// value. `symmetric_split` folds `sqrt(sigma)` into both returned bases
/// (for `Basis::Sym`'s `Q * Q^T`-shaped product); otherwise the full
/// singular values are folded into the left basis only (for `Basis::Nonsym`'s
/// `U * V^T`).
fn truncated_svd(
    block: &Array2<f64>,
    tolerance: f64,
    symmetric_split: bool,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let (u, s, vt) = block
        .svd(true, true)
        .map_err(|e| HodlrError::Assembly { level: 0, k: 0, reason: e.to_string() })?;
    let u = u.expect("calc_u = true");
    let vt = vt.expect("calc_vt = true");

    let s_max = s.iter().cloned().fold(0.0_f64, f64::max);
    let rank = if s_max <= 0.0 {
        0
    } else {
        s.iter().take_while(|&&sv| sv > tolerance * s_max).count()
    };

    let mut left = u.slice(s![.., 0..rank]).to_owned();
    let mut right = vt.slice(s![0..rank, ..]).t().to_owned();

    if symmetric_split {
        for j in 0..rank {
            let scale = s[j].sqrt();
            left.column_mut(j).mapv_inplace(|x| x * scale);
            right.column_mut(j).mapv_inplace(|x| x * scale);
        }
    } else {
        for j in 0..rank {
            let scale = s[j];
            left.column_mut(j).mapv_inplace(|x| x * scale);
        }
    }

    Ok((left, right))
}

fn random_array2(rows: usize, cols: usize, rng: &mut Pcg64) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| rng.random::<f64>() * 2.0 - 1.0)
}

fn col(v: &[f64]) -> Array2<f64> {
    Array2::from_shape_vec((v.len(), 1), v.to_vec()).unwrap()
}

fn build_and_assemble(a: Array2<f64>, levels: usize, tolerance: f64, is_sym: bool) -> Tree<f64> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let n = a.nrows();
    let oracle = DenseOracle::new(a);
    let mut tree = Tree::<f64>::build(TreeConfig { n, levels, tolerance, is_sym });
    Assembler::assemble(&mut tree, &oracle).unwrap();
    tree
}

fn rel_err(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    let num = (a - b).iter().map(|x| x * x).sum::<f64>().sqrt();
    let den = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if den == 0.0 {
        num
    } else {
        num / den
    }
}

// --- Scenario 1: N=8, L=1, A=I, symmetric ---------------------------------

#[test]
fn scenario_identity_solve_is_identity() {
    let a = Array2::eye(8);
    let mut tree = build_and_assemble(a, 1, 1e-12, true);
    tree.factorize().unwrap();

    let b = col(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    let x = tree.solve(&b).unwrap();
    assert_relative_eq!(x, b, epsilon = 1e-10);

    let log_det = tree.log_determinant().unwrap();
    assert_relative_eq!(log_det, 0.0, epsilon = 1e-10);
}

// --- Scenario 2: N=4, L=1, A=2I ---------------------------------

#[test]
fn scenario_scaled_identity() {
    let a = Array2::eye(4) * 2.0;
    let mut tree = build_and_assemble(a, 1, 1e-12, true);
    tree.factorize().unwrap();

    let b = Array2::ones((4, 1));
    let x = tree.solve(&b).unwrap();
    assert_relative_eq!(x, Array2::from_elem((4, 1), 0.5), epsilon = 1e-10);

    let log_det = tree.log_determinant().unwrap();
    assert_relative_eq!(log_det, 16.0_f64.ln(), epsilon = 1e-8);
}

// --- Scenario 3: N=16, L=2, A_ij = 1/(1+|i-j|) ---------------------------------

#[test]
fn scenario_cauchy_like_matmat_reconstructs_column() {
    let n = 16;
    let a = Array2::from_shape_fn((n, n), |(i, j)| 1.0 / (1.0 + (i as f64 - j as f64).abs()));
    let tree = build_and_assemble(a.clone(), 2, 1e-12, true);

    let mut e0 = Array2::zeros((n, 1));
    e0[(0, 0)] = 1.0;
    let reconstructed = tree.matmat(&e0).unwrap();
    let expected = a.slice(s![.., 0..1]).to_owned();
    assert!(rel_err(&reconstructed, &expected) < 1e-6);
}

// --- Scenario 4: N=32, L=3, symmetric Cauchy kernel on sorted points ---------------------------------

#[test]
fn scenario_cauchy_kernel_solve_residual() {
    let mut rng = Pcg64::seed_from_u64(0xcafe_babe ^ 0xdead_beef);
    let n = 32;
    let mut points: Vec<f64> = (0..n).map(|_| rng.random::<f64>() + 1.0).collect();
    points.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let a = Array2::from_shape_fn((n, n), |(i, j)| 1.0 / (points[i] + points[j]));
    let b = random_array2(n, 1, &mut rng);

    let mut tree = build_and_assemble(a.clone(), 3, 1e-12, true);
    tree.factorize().unwrap();
    let x = tree.solve(&b).unwrap();

    let residual = a.dot(&x) - &b;
    let rel = residual.iter().map(|v| v * v).sum::<f64>().sqrt()
        / b.iter().map(|v| v * v).sum::<f64>().sqrt();
    assert!(rel < 1e-6, "residual {rel} too large");
}

// --- Scenario 5: N=64, L=4, nonsymmetric with tiny off-diagonal coupling ---------------------------------

#[test]
fn scenario_nonsym_agrees_with_dense_reference() {
    let mut rng = Pcg64::seed_from_u64(0x1234_5678 ^ 0x9abc_def0);
    let n = 64;

    let mut a = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        a[(i, i)] = 10.0 + rng.random::<f64>();
    }
    let off = random_array2(n, n, &mut rng).mapv(|v| v * 1e-14);
    a = a + off;

    let dense_det = a.det().unwrap();
    let b = random_array2(n, 1, &mut rng);
    let dense_x = a.clone().solve_into(b.column(0).to_owned()).unwrap();

    let mut tree = build_and_assemble(a, 4, 1e-12, false);
    tree.factorize().unwrap();
    let x = tree.solve(&b).unwrap();
    let log_det = tree.log_determinant().unwrap();

    assert_relative_eq!(log_det, dense_det.abs().ln(), epsilon = 1e-6);
    assert!(rel_err(&x, &Array2::from_shape_vec((n, 1), dense_x.to_vec()).unwrap()) < 1e-6);
}

// --- Scenario 6: N=100, L=0 (degenerate single leaf) ---------------------------------

#[test]
fn scenario_degenerate_single_leaf_reduces_to_dense() {
    let mut rng = Pcg64::seed_from_u64(0x0 ^ 0x1);
    let n = 100;
    let a = random_array2(n, n, &mut rng);
    let x = random_array2(n, 1, &mut rng);

    let tree = build_and_assemble(a.clone(), 0, 1e-12, false);
    let reconstructed = tree.matmat(&x).unwrap();
    assert_relative_eq!(reconstructed, a.dot(&x), epsilon = 1e-10);
}

// --- General properties ---------------------------------

#[test]
fn round_trip_solve_inverts_matmat() {
    let mut rng = Pcg64::seed_from_u64(42 ^ 7);
    let n = 32;
    let points: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
    let a = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            n as f64
        } else {
            1.0 / (points[i] + points[j])
        }
    });
    let x = random_array2(n, 1, &mut rng);

    let mut tree = build_and_assemble(a, 3, 1e-13, true);
    let b = tree.matmat(&x).unwrap();
    tree.factorize().unwrap();
    let recovered = tree.solve(&b).unwrap();

    assert!(rel_err(&recovered, &x) < 1e-6);
}

#[test]
fn symmetric_and_nonsymmetric_modes_agree() {
    let mut rng = Pcg64::seed_from_u64(99 ^ 99);
    let n = 32;
    let points: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
    let a = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            n as f64
        } else {
            1.0 / (points[i] + points[j])
        }
    });
    let b = random_array2(n, 1, &mut rng);

    let mut sym_tree = build_and_assemble(a.clone(), 3, 1e-13, true);
    sym_tree.factorize().unwrap();
    let x_sym = sym_tree.solve(&b).unwrap();

    let mut nonsym_tree = build_and_assemble(a, 3, 1e-13, false);
    nonsym_tree.factorize().unwrap();
    let x_nonsym = nonsym_tree.solve(&b).unwrap();

    assert!(rel_err(&x_sym, &x_nonsym) < 1e-6);
}

#[test]
fn zero_rank_off_diagonal_blocks_behave_as_block_diagonal() {
    let n = 16;
    let mut a = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        a[(i, i)] = (i + 1) as f64;
    }
    let mut tree = build_and_assemble(a.clone(), 2, 1e-10, true);

    let x = Array2::ones((n, 1));
    let b = tree.matmat(&x).unwrap();
    assert_relative_eq!(b, a.dot(&x), epsilon = 1e-10);

    tree.factorize().unwrap();
    let solved = tree.solve(&b).unwrap();
    assert_relative_eq!(solved, x, epsilon = 1e-8);
}

#[test]
fn factorize_twice_is_rejected() {
    let a = Array2::eye(8);
    let mut tree = build_and_assemble(a, 1, 1e-12, true);
    tree.factorize().unwrap();
    let second = tree.factorize();
    assert!(matches!(second, Err(HodlrError::InvalidState(_))));
}

#[test]
fn nonsym_solve_handles_unequal_child_sizes() {
    // n = 37 bisects into unequal child blocks at every level (e.g. 18/19 at
    // the root), so this exercises solve_nonleaf's basis algebra with
    // differently-shaped children rather than every split happening to be
    // exactly half-and-half.
    let mut rng = Pcg64::seed_from_u64(0x0ddb_a11 ^ 0xfeed_face);
    let n = 37;
    let points: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
    let a = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            n as f64
        } else {
            1.0 / (points[i] + points[j])
        }
    });
    let b = random_array2(n, 1, &mut rng);

    let mut tree = build_and_assemble(a.clone(), 2, 1e-10, false);
    tree.factorize().unwrap();
    let x = tree.solve(&b).unwrap();

    let residual = a.dot(&x) - &b;
    let rel = residual.iter().map(|v| v * v).sum::<f64>().sqrt()
        / b.iter().map(|v| v * v).sum::<f64>().sqrt();
    assert!(rel < 1e-6, "residual {rel} too large");
}

#[test]
fn partition_matches_declared_size() {
    let n = 37;
    let a = Array2::<f64>::eye(n);
    let tree = build_and_assemble(a, 2, 1e-10, true);
    assert_eq!(tree.n(), n);
    assert_eq!(tree.levels(), 2);
}
