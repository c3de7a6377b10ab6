//! Small dense linear-algebra helpers for symmetric positive-definite matrices.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Lower-triangular Cholesky factor `L` with `a = L Lᵀ`.
///
/// Returns `None` if `a` is not square or not positive definite.
pub fn cholesky(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if !(diag > 0.0) || !diag.is_finite() {
            return None;
        }
        let diag = diag.sqrt();
        l[[j, j]] = diag;
        for i in (j + 1)..n {
            let mut v = a[[i, j]];
            for k in 0..j {
                v -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = v / diag;
        }
    }
    Some(l)
}

/// Solves `L y = b` for lower-triangular `L`.
pub fn solve_lower(l: ArrayView2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut v = b[i];
        for k in 0..i {
            v -= l[[i, k]] * y[k];
        }
        y[i] = v / l[[i, i]];
    }
    y
}

/// Solves `Lᵀ x = y` for lower-triangular `L`.
pub fn solve_upper_transposed(l: ArrayView2<f64>, y: ArrayView1<f64>) -> Array1<f64> {
    let n = y.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut v = y[i];
        for k in (i + 1)..n {
            v -= l[[k, i]] * x[k];
        }
        x[i] = v / l[[i, i]];
    }
    x
}

/// Solves `a x = b` for symmetric positive-definite `a`.
pub fn spd_solve(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Option<Array1<f64>> {
    let l = cholesky(a)?;
    let y = solve_lower(l.view(), b);
    Some(solve_upper_transposed(l.view(), y.view()))
}

/// `log |a|` from its Cholesky factor.
pub fn log_det_from_cholesky(l: ArrayView2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}
