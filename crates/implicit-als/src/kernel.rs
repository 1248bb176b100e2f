//! Implicit ALS numeric kernels.
//!
//! For a row `u` with observed ratings `r_uj`:
//!
//! ```text
//! c_uj = 1 + alpha * r_uj
//! p_uj = 1 if r_uj > preference_threshold else 0
//! A    = YᵀY + Σ_j (c_uj − 1) y_j y_jᵀ + lambda·I
//! b    = Σ_j c_uj p_uj y_j
//! x_u  = A⁻¹ b
//! ```
//!
//! `YᵀY` over *all* rows of the other side is the only dense term; it is the
//! cross-product computed by distributed steps 1 and 2.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::AlsError;
use crate::solver::solve_spd;
use crate::table::{CsrTable, DenseTable};
use crate::types::Parameter;

/// Rows of the other side's factors, addressed by global index.
pub trait FactorSource {
    /// Factor vector of global row `index`, if available.
    fn factor(&self, index: usize) -> Option<&[f64]>;
}

impl FactorSource for DenseTable {
    fn factor(&self, index: usize) -> Option<&[f64]> {
        (index < self.n_rows()).then(|| self.row(index))
    }
}

/// Add `FᵀF` of a row-major factor block into `acc` (`k × k`, row-major).
pub fn add_cross_product(acc: &mut [f64], factors: &DenseTable) {
    let k = factors.n_cols();
    debug_assert_eq!(acc.len(), k * k);
    for r in 0..factors.n_rows() {
        let f = factors.row(r);
        for i in 0..k {
            let fi = f[i];
            if fi == 0.0 {
                continue;
            }
            for j in 0..=i {
                acc[i * k + j] += fi * f[j];
            }
        }
    }
    // mirror the lower triangle
    for i in 0..k {
        for j in (i + 1)..k {
            acc[i * k + j] = acc[j * k + i];
        }
    }
}

/// `FᵀF` of a factor block as a full `k × k` table.
pub fn cross_product(factors: &DenseTable) -> DenseTable {
    let k = factors.n_cols();
    let mut out = DenseTable::zeros(k, k);
    add_cross_product(out.data_mut(), factors);
    out
}

/// Solve the normal equations of one row into `out`.
///
/// `row` is the global index, used only for error reporting.
fn solve_row<S: FactorSource + ?Sized>(
    cols: &[usize],
    vals: &[f64],
    row: usize,
    other: &S,
    cross_product: &DenseTable,
    param: &Parameter,
    out: &mut [f64],
) -> Result<(), AlsError> {
    let k = param.n_factors;
    if cols.is_empty() {
        out.fill(0.0);
        return Ok(());
    }

    let mut a = cross_product.data().to_vec();
    let mut b = vec![0.0; k];
    for i in 0..k {
        a[i * k + i] += param.lambda;
    }

    for (&j, &r) in cols.iter().zip(vals) {
        let y = other.factor(j).ok_or_else(|| {
            AlsError::IncorrectIndex(format!(
                "factors of column {} required by row {} are missing",
                j, row
            ))
        })?;
        let c = 1.0 + param.alpha * r;
        let w = c - 1.0;
        if w != 0.0 {
            for p in 0..k {
                let wy = w * y[p];
                for q in 0..=p {
                    a[p * k + q] += wy * y[q];
                }
            }
        }
        if r > param.preference_threshold {
            for p in 0..k {
                b[p] += c * y[p];
            }
        }
    }

    if !solve_spd(&mut a, &mut b, k) {
        return Err(AlsError::NotPositiveDefinite { row });
    }
    out.copy_from_slice(&b);
    Ok(())
}

/// Recompute the factors of every row of `data`.
///
/// `data` rows are local rows whose global indices start at `row_offset`;
/// its columns are global indices resolved through `other`. `out` must be
/// `data.n_rows() × n_factors`.
pub fn update_factors<S: FactorSource + Sync + ?Sized>(
    data: &CsrTable,
    row_offset: usize,
    other: &S,
    cross_product: &DenseTable,
    param: &Parameter,
    out: &mut DenseTable,
) -> Result<(), AlsError> {
    param.validate()?;
    let k = param.n_factors;
    param.check_cross_product(cross_product, "crossProduct")?;
    out.check_full("factors", Some(data.n_rows()), k)?;

    let solve = |(u, x): (usize, &mut [f64])| {
        let (cols, vals) = data.row(u);
        solve_row(cols, vals, row_offset + u, other, cross_product, param, x)
    };

    #[cfg(feature = "rayon")]
    {
        out.data_mut()
            .par_chunks_mut(k)
            .enumerate()
            .try_for_each(solve)
    }
    #[cfg(not(feature = "rayon"))]
    {
        out.data_mut().chunks_mut(k).enumerate().try_for_each(solve)
    }
}
