//! Training objective and fit diagnostics.

use crate::error::AlsError;
use crate::kernel::cross_product;
use crate::table::CsrTable;
use crate::types::{Model, Parameter};
use crate::util::dot;

fn check_shape(data: &CsrTable, model: &Model) -> Result<(), AlsError> {
    if data.n_rows() != model.n_users() || data.n_cols() != model.n_items() {
        return Err(AlsError::IncorrectTableSize {
            name: "data",
            expected: format!("{} x {}", model.n_users(), model.n_items()),
            actual: format!("{} x {}", data.n_rows(), data.n_cols()),
        });
    }
    Ok(())
}

/// `xᵀ·M·x` for a row-major `k × k` matrix `m`.
fn quadratic_form(x: &[f64], m: &[f64]) -> f64 {
    let k = x.len();
    (0..k).map(|i| x[i] * dot(&m[i * k..(i + 1) * k], x)).sum()
}

/// Weighted implicit objective over every user/item pair:
///
/// ```text
/// Σ_ui c_ui (p_ui − x_uᵀy_i)² + lambda (‖X‖² + ‖Y‖²)
/// ```
///
/// Unobserved pairs have `c = 1, p = 0`; they are summed in closed form
/// through `YᵀY` and only observed pairs are visited.
pub fn implicit_loss(data: &CsrTable, model: &Model, param: &Parameter) -> Result<f64, AlsError> {
    check_shape(data, model)?;
    let yty = cross_product(model.items_factors());

    let mut loss = 0.0;
    for u in 0..model.n_users() {
        let x = model.user(u);
        loss += quadratic_form(x, yty.data());
        let (items, ratings) = data.row(u);
        for (&i, &r) in items.iter().zip(ratings) {
            let s = dot(x, model.item(i));
            let c = 1.0 + param.alpha * r;
            let p = if r > param.preference_threshold { 1.0 } else { 0.0 };
            loss += c * (p - s) * (p - s) - s * s;
        }
    }

    let norm2 = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>();
    let reg = norm2(model.users_factors().data()) + norm2(model.items_factors().data());
    Ok(loss + param.lambda * reg)
}

/// Root-mean-square error of the predicted preference over observed
/// entries only.
pub fn rmse_observed(data: &CsrTable, model: &Model, param: &Parameter) -> Result<f64, AlsError> {
    check_shape(data, model)?;
    if data.nnz() == 0 {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for u in 0..data.n_rows() {
        let (items, ratings) = data.row(u);
        for (&i, &r) in items.iter().zip(ratings) {
            let p = if r > param.preference_threshold { 1.0 } else { 0.0 };
            let e = p - dot(model.user(u), model.item(i));
            sum += e * e;
        }
    }
    Ok((sum / data.nnz() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DenseTable;
    use approx::assert_abs_diff_eq;

    fn model() -> Model {
        Model::new(
            DenseTable::from_rows(&[vec![1.0, 0.0], vec![0.5, 1.0]]).unwrap(),
            DenseTable::from_rows(&[vec![1.0, 1.0], vec![0.0, 2.0], vec![1.0, 0.0]]).unwrap(),
        )
        .unwrap()
    }

    fn brute_force(data: &CsrTable, model: &Model, param: &Parameter) -> f64 {
        let dense = data.to_dense();
        let mut loss = 0.0;
        for u in 0..model.n_users() {
            for i in 0..model.n_items() {
                let r = dense.get(u, i);
                let (c, p) = if r != 0.0 {
                    (
                        1.0 + param.alpha * r,
                        if r > param.preference_threshold { 1.0 } else { 0.0 },
                    )
                } else {
                    (1.0, 0.0)
                };
                let e = p - dot(model.user(u), model.item(i));
                loss += c * e * e;
            }
        }
        let reg: f64 = model
            .users_factors()
            .data()
            .iter()
            .chain(model.items_factors().data())
            .map(|v| v * v)
            .sum();
        loss + param.lambda * reg
    }

    #[test]
    fn closed_form_loss_matches_brute_force() {
        let data =
            CsrTable::from_triplets(2, 3, &[(0, 0, 2.0), (1, 1, 1.0), (1, 2, 0.5)]).unwrap();
        let param = Parameter {
            n_factors: 2,
            alpha: 3.0,
            lambda: 0.25,
            preference_threshold: 0.75,
            ..Default::default()
        };
        let m = model();
        assert_abs_diff_eq!(
            implicit_loss(&data, &m, &param).unwrap(),
            brute_force(&data, &m, &param),
            epsilon = 1e-10
        );
    }

    #[test]
    fn rmse_over_observed_entries() {
        // user 0 · item 0 = 1 (perfect), user 1 · item 1 = 2 (error -1)
        let data = CsrTable::from_triplets(2, 3, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let rmse = rmse_observed(&data, &model(), &Parameter::default()).unwrap();
        assert_abs_diff_eq!(rmse, (0.5f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let data = CsrTable::empty(3, 3);
        assert!(implicit_loss(&data, &model(), &Parameter::default()).is_err());
        assert!(rmse_observed(&data, &model(), &Parameter::default()).is_err());
    }
}
