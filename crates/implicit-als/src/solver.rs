//! Dense symmetric positive-definite solver for the per-row normal
//! equations.
//!
//! Systems are small (`n_factors × n_factors`) and solved once per row, so a
//! plain row-major Cholesky factorisation is used.

/// Overwrite the lower triangle of `a` (row-major `k × k`) with its Cholesky
/// factor `L`, where `A = L·Lᵀ`.
///
/// Returns `false` when `a` is not positive definite. The upper triangle is
/// left untouched.
pub fn cholesky_in_place(a: &mut [f64], k: usize) -> bool {
    debug_assert_eq!(a.len(), k * k);
    for j in 0..k {
        let mut diag = a[j * k + j];
        for p in 0..j {
            diag -= a[j * k + p] * a[j * k + p];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return false;
        }
        let ljj = diag.sqrt();
        a[j * k + j] = ljj;
        for i in (j + 1)..k {
            let mut s = a[i * k + j];
            for p in 0..j {
                s -= a[i * k + p] * a[j * k + p];
            }
            a[i * k + j] = s / ljj;
        }
    }
    true
}

/// Solve `L·Lᵀ·x = b` in place given the factor from [`cholesky_in_place`].
pub fn cholesky_solve(l: &[f64], k: usize, b: &mut [f64]) {
    // forward: L·y = b
    for i in 0..k {
        let mut s = b[i];
        for p in 0..i {
            s -= l[i * k + p] * b[p];
        }
        b[i] = s / l[i * k + i];
    }
    // backward: Lᵀ·x = y
    for i in (0..k).rev() {
        let mut s = b[i];
        for p in (i + 1)..k {
            s -= l[p * k + i] * b[p];
        }
        b[i] = s / l[i * k + i];
    }
}

/// Solve the SPD system `a·x = b`, destroying `a` and writing `x` into `b`.
///
/// Returns `false` if `a` is not positive definite; `b` is then unchanged.
pub fn solve_spd(a: &mut [f64], b: &mut [f64], k: usize) -> bool {
    if !cholesky_in_place(a, k) {
        return false;
    }
    cholesky_solve(a, k, b);
    true
}
