//! Tiny dense linear algebra on fixed-size arrays.
//!
//! Everything here works on at most 3x3 systems, so plain Gaussian elimination and Cholesky are
//! all that is needed.

/// Solves `a x = b` with partially pivoted Gaussian elimination.
///
/// Returns [`None`] if `a` is singular.
pub(crate) fn solve<const D: usize>(mut a: [[f64; D]; D], mut b: [f64; D]) -> Option<[f64; D]> {
    for col in 0..D {
        let pivot = (col..D).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col] == 0. || !a[pivot][col].is_finite() {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..D {
            let f = a[row][col] / a[col][col];
            for k in col..D {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0.; D];
    for row in (0..D).rev() {
        let s: f64 = (row + 1..D).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - s) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Inverts `a`, returning [`None`] if it is singular.
pub(crate) fn inverse<const D: usize>(a: &[[f64; D]; D]) -> Option<[[f64; D]; D]> {
    let mut inv = [[0.; D]; D];
    for col in 0..D {
        let mut e = [0.; D];
        e[col] = 1.;
        let x = solve(*a, e)?;
        for row in 0..D {
            inv[row][col] = x[row];
        }
    }
    Some(inv)
}

pub(crate) fn mat_vec<const D: usize>(a: &[[f64; D]; D], x: &[f64; D]) -> [f64; D] {
    std::array::from_fn(|i| (0..D).map(|j| a[i][j] * x[j]).sum())
}

/// `aᵀ x`
pub(crate) fn mat_t_vec<const D: usize>(a: &[[f64; D]; D], x: &[f64; D]) -> [f64; D] {
    std::array::from_fn(|j| (0..D).map(|i| a[i][j] * x[i]).sum())
}

pub(crate) fn norm2<const D: usize>(x: &[f64; D]) -> f64 {
    x.iter().map(|v| v * v).sum()
}

/// Solves the leading `k x k` block of the symmetric system `a x = b` by Cholesky factorization.
///
/// Returns [`None`] unless the block is positive definite.
pub(crate) fn cholesky_solve(k: usize, a: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let mut l = [[0.; 3]; 3];
    for i in 0..k {
        for j in 0..=i {
            let s: f64 = (0..j).map(|m| l[i][m] * l[j][m]).sum();
            if i == j {
                let d = a[i][i] - s;
                if !(d > 0.) {
                    return None;
                }
                l[i][i] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - s) / l[j][j];
            }
        }
    }
    let mut y = [0.; 3];
    for i in 0..k {
        let s: f64 = (0..i).map(|m| l[i][m] * y[m]).sum();
        y[i] = (b[i] - s) / l[i][i];
    }
    let mut x = [0.; 3];
    for i in (0..k).rev() {
        let s: f64 = (i + 1..k).map(|m| l[m][i] * x[m]).sum();
        x[i] = (y[i] - s) / l[i][i];
    }
    x[..k].iter().all(|v| v.is_finite()).then_some(x)
}
