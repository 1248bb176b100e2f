//! Rating prediction and top-k recommendation.
//!
//! Predicted ratings are `x_uᵀ y_i`. [`PredictStep1Local`] computes one
//! users-block × items-block tile of the rating matrix from two partial
//! models, so a distributed run can predict without assembling the model.

use crate::distributed::DistributedStep;
use crate::error::AlsError;
use crate::table::{CsrTable, DenseTable, IndexTable};
use crate::types::{Model, Parameter, PartialModel};
use crate::util::dot;

fn fill_ratings(users: &DenseTable, items: &DenseTable, out: &mut DenseTable) {
    for u in 0..users.n_rows() {
        let x = users.row(u);
        for (i, r) in out.row_mut(u).iter_mut().enumerate() {
            *r = dot(x, items.row(i));
        }
    }
}

/// Full `n_users × n_items` predicted rating matrix.
pub fn predict_ratings(model: &Model) -> DenseTable {
    let mut out = DenseTable::zeros(model.n_users(), model.n_items());
    fill_ratings(model.users_factors(), model.items_factors(), &mut out);
    out
}

/// Predicted rating of one user/item pair.
pub fn predict_rating(model: &Model, user: usize, item: usize) -> Result<f64, AlsError> {
    if user >= model.n_users() || item >= model.n_items() {
        return Err(AlsError::IncorrectIndex(format!(
            "pair ({}, {}) outside {} x {}",
            user,
            item,
            model.n_users(),
            model.n_items()
        )));
    }
    Ok(dot(model.user(user), model.item(item)))
}

/// The `k` highest-scoring items for `user`, best first.
///
/// Items the user already rated in `exclude` are skipped. Ties keep the
/// lower item index first.
pub fn recommend(
    model: &Model,
    user: usize,
    k: usize,
    exclude: Option<&CsrTable>,
) -> Result<Vec<(usize, f64)>, AlsError> {
    if user >= model.n_users() {
        return Err(AlsError::IncorrectIndex(format!(
            "user {} outside 0..{}",
            user,
            model.n_users()
        )));
    }
    let seen: &[usize] = match exclude {
        Some(r) if user < r.n_rows() => r.row(user).0,
        _ => &[],
    };

    let x = model.user(user);
    let mut scored: Vec<(usize, f64)> = (0..model.n_items())
        .filter(|i| seen.binary_search(i).is_err())
        .map(|i| (i, dot(x, model.item(i))))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    Ok(scored)
}

// ─── Distributed prediction ──────────────────────────────────────────

/// Input of [`PredictStep1Local`].
#[derive(Debug, Clone, Default)]
pub struct PredictStep1LocalInput {
    users_partial_model: Option<PartialModel>,
    items_partial_model: Option<PartialModel>,
}

impl PredictStep1LocalInput {
    pub fn new(users: PartialModel, items: PartialModel) -> Self {
        Self {
            users_partial_model: Some(users),
            items_partial_model: Some(items),
        }
    }

    pub fn set_users_partial_model(&mut self, pm: PartialModel) {
        self.users_partial_model = Some(pm);
    }

    pub fn set_items_partial_model(&mut self, pm: PartialModel) {
        self.items_partial_model = Some(pm);
    }
}

/// One tile of predicted ratings.
#[derive(Debug, Clone, Default)]
pub struct PredictPartialResult {
    ratings: Option<DenseTable>,
    user_indices: IndexTable,
    item_indices: IndexTable,
}

impl PredictPartialResult {
    /// `users × items` predicted ratings of the tile.
    pub fn ratings(&self) -> Option<&DenseTable> {
        self.ratings.as_ref()
    }

    /// Global user index of every tile row.
    pub fn user_indices(&self) -> &[usize] {
        &self.user_indices
    }

    /// Global item index of every tile column.
    pub fn item_indices(&self) -> &[usize] {
        &self.item_indices
    }
}

/// Predict the ratings of a users block against an items block.
#[derive(Debug, Clone)]
pub struct PredictStep1Local {
    param: Parameter,
}

impl PredictStep1Local {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

fn predict_parts(input: &PredictStep1LocalInput) -> Result<(&PartialModel, &PartialModel), AlsError> {
    let users = input
        .users_partial_model
        .as_ref()
        .ok_or(AlsError::NullPartialModel)?;
    let items = input
        .items_partial_model
        .as_ref()
        .ok_or(AlsError::NullPartialModel)?;
    Ok((users, items))
}

impl DistributedStep for PredictStep1Local {
    type Input = PredictStep1LocalInput;
    type PartialResult = PredictPartialResult;
    const NAME: &'static str = "predictStep1Local";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &PredictStep1LocalInput) -> Result<(), AlsError> {
        let (users, items) = predict_parts(input)?;
        users.check(&self.param, "usersPartialModel")?;
        items.check(&self.param, "itemsPartialModel")
    }

    fn allocate(&self, input: &PredictStep1LocalInput) -> Result<PredictPartialResult, AlsError> {
        let (users, items) = predict_parts(input)?;
        Ok(PredictPartialResult {
            ratings: Some(DenseTable::zeros(users.n_rows(), items.n_rows())),
            user_indices: users.indices().to_vec(),
            item_indices: items.indices().to_vec(),
        })
    }

    fn compute_into(
        &self,
        input: &PredictStep1LocalInput,
        result: &mut PredictPartialResult,
    ) -> Result<(), AlsError> {
        let (users, items) = predict_parts(input)?;
        let out = result
            .ratings
            .as_mut()
            .ok_or(AlsError::NullPartialResult("prediction"))?;
        fill_ratings(users.factors(), items.factors(), out);
        Ok(())
    }

    fn check_partial_result(
        &self,
        input: &PredictStep1LocalInput,
        result: &PredictPartialResult,
    ) -> Result<(), AlsError> {
        let (users, items) = predict_parts(input)?;
        let ratings = result
            .ratings
            .as_ref()
            .ok_or(AlsError::NullPartialResult("prediction"))?;
        ratings.check_full("prediction", Some(users.n_rows()), items.n_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        Model::new(
            DenseTable::from_rows(&[vec![1.0, 0.0], vec![0.0, 2.0]]).unwrap(),
            DenseTable::from_rows(&[vec![0.5, 1.0], vec![3.0, 0.0], vec![1.0, 1.0]]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn full_prediction_is_x_times_y_transposed() {
        let r = predict_ratings(&model());
        assert_eq!(r.data(), &[0.5, 3.0, 1.0, 2.0, 0.0, 2.0]);
        assert_eq!(predict_rating(&model(), 1, 2).unwrap(), 2.0);
        assert!(predict_rating(&model(), 2, 0).is_err());
    }

    #[test]
    fn recommend_orders_and_excludes() {
        let m = model();
        let top = recommend(&m, 0, 2, None).unwrap();
        assert_eq!(top, vec![(1, 3.0), (2, 1.0)]);

        let rated = CsrTable::from_triplets(2, 3, &[(0, 1, 5.0)]).unwrap();
        let top = recommend(&m, 0, 5, Some(&rated)).unwrap();
        assert_eq!(top, vec![(2, 1.0), (0, 0.5)]);

        // user 1 ties on items 0 and 2
        let top = recommend(&m, 1, 3, None).unwrap();
        assert_eq!(top, vec![(0, 2.0), (2, 2.0), (1, 0.0)]);
    }

    #[test]
    fn distributed_tile_matches_full_prediction() {
        let m = model();
        let full = predict_ratings(&m);
        let users = PartialModel::from_offset(DenseTable::from_rows(&[m.user(1).to_vec()]).unwrap(), 1);
        let items = PartialModel::from_indices(
            DenseTable::from_rows(&[m.item(0).to_vec(), m.item(2).to_vec()]).unwrap(),
            vec![0, 2],
        )
        .unwrap();
        let param = Parameter {
            n_factors: 2,
            ..Default::default()
        };
        let tile = PredictStep1Local::new(param)
            .compute(&PredictStep1LocalInput::new(users, items))
            .unwrap();
        assert_eq!(tile.user_indices(), &[1]);
        assert_eq!(tile.item_indices(), &[0, 2]);
        let r = tile.ratings().unwrap();
        assert_eq!(r.get(0, 0), full.get(1, 0));
        assert_eq!(r.get(0, 1), full.get(1, 2));
    }

    #[test]
    fn distributed_prediction_requires_both_models() {
        let mut input = PredictStep1LocalInput::default();
        input.set_users_partial_model(PartialModel::zeros(1, 2, 0));
        let step = PredictStep1Local::new(Parameter {
            n_factors: 2,
            ..Default::default()
        });
        let err = step.compute(&input).unwrap_err();
        assert!(matches!(err, AlsError::NullPartialModel));

        input.set_items_partial_model(PartialModel::zeros(3, 2, 0));
        let tile = step.compute(&input).unwrap();
        let r = tile.ratings().unwrap();
        assert_eq!((r.n_rows(), r.n_cols()), (1, 3));
    }
}
