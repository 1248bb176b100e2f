//! The four steps of distributed implicit ALS training.
//!
//! One epoch updates one side (users or items) of the model:
//!
//! | step | runs on | consumes | produces |
//! |------|---------|----------|----------|
//! | [`Step1Local`]  | every node | local partial model of the *other* side | `FᵀF` of that block |
//! | [`Step2Master`] | master     | every node's `FᵀF` | their sum `YᵀY` |
//! | [`Step3Local`]  | every node | local partial model + routing table | partial models keyed by destination |
//! | [`Step4Local`]  | every node | received partial models, local ratings, `YᵀY` | new partial model of this side |
//!
//! Each step follows the same life cycle through [`DistributedStep::compute`]:
//! check the input, allocate the partial result, fill it, check it.

use std::collections::HashMap;

use crate::collection::KeyValueCollection;
use crate::error::AlsError;
use crate::kernel::{add_cross_product, update_factors, FactorSource};
use crate::table::{CsrTable, DenseTable, IndexTable};
use crate::types::{Parameter, PartialModel};

/// A single step of a distributed computation.
pub trait DistributedStep {
    type Input;
    type PartialResult;

    /// Step name used in diagnostics.
    const NAME: &'static str;

    fn parameter(&self) -> &Parameter;

    /// Validate that all required inputs are set and consistent.
    fn check_input(&self, input: &Self::Input) -> Result<(), AlsError>;

    /// Allocate a partial result shaped for `input`.
    fn allocate(&self, input: &Self::Input) -> Result<Self::PartialResult, AlsError>;

    /// Fill an allocated partial result.
    fn compute_into(
        &self,
        input: &Self::Input,
        result: &mut Self::PartialResult,
    ) -> Result<(), AlsError>;

    /// Validate a filled partial result against `input`.
    fn check_partial_result(
        &self,
        input: &Self::Input,
        result: &Self::PartialResult,
    ) -> Result<(), AlsError>;

    /// Run the full step: validate, allocate, compute, validate.
    fn compute(&self, input: &Self::Input) -> Result<Self::PartialResult, AlsError> {
        self.parameter().validate()?;
        self.check_input(input)?;
        let mut result = self.allocate(input)?;
        self.compute_into(input, &mut result)?;
        self.check_partial_result(input, &result)?;
        tracing::trace!(step = Self::NAME, "step finished");
        Ok(result)
    }
}

// ─── Step 1 ──────────────────────────────────────────────────────────

/// Input of [`Step1Local`].
#[derive(Debug, Clone, Default)]
pub struct Step1LocalInput {
    partial_model: Option<PartialModel>,
}

impl Step1LocalInput {
    pub fn new(partial_model: PartialModel) -> Self {
        Self {
            partial_model: Some(partial_model),
        }
    }

    pub fn set_partial_model(&mut self, partial_model: PartialModel) {
        self.partial_model = Some(partial_model);
    }

    pub fn partial_model(&self) -> Option<&PartialModel> {
        self.partial_model.as_ref()
    }
}

/// Cross-product partial result of steps 1 and 2.
#[derive(Debug, Clone, Default)]
pub struct CrossProductPartialResult {
    cross_product: Option<DenseTable>,
}

impl CrossProductPartialResult {
    /// Zero `n_factors × n_factors` cross-product.
    pub fn allocate(param: &Parameter) -> Self {
        Self {
            cross_product: Some(DenseTable::zeros(param.n_factors, param.n_factors)),
        }
    }

    pub fn cross_product(&self) -> Option<&DenseTable> {
        self.cross_product.as_ref()
    }

    pub fn set_cross_product(&mut self, table: DenseTable) {
        self.cross_product = Some(table);
    }

    pub fn into_cross_product(self) -> Result<DenseTable, AlsError> {
        self.cross_product
            .ok_or(AlsError::NullPartialResult("crossProduct"))
    }

    fn check(&self, param: &Parameter) -> Result<(), AlsError> {
        let cp = self
            .cross_product
            .as_ref()
            .ok_or(AlsError::NullPartialResult("crossProduct"))?;
        param.check_cross_product(cp, "crossProduct")
    }
}

/// Step 1: cross-product of the local factor block.
#[derive(Debug, Clone)]
pub struct Step1Local {
    param: Parameter,
}

impl Step1Local {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

impl DistributedStep for Step1Local {
    type Input = Step1LocalInput;
    type PartialResult = CrossProductPartialResult;
    const NAME: &'static str = "step1Local";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &Step1LocalInput) -> Result<(), AlsError> {
        let pm = input
            .partial_model
            .as_ref()
            .ok_or(AlsError::NullPartialModel)?;
        pm.check(&self.param, "partialModel")
    }

    fn allocate(&self, _input: &Step1LocalInput) -> Result<Self::PartialResult, AlsError> {
        Ok(CrossProductPartialResult::allocate(&self.param))
    }

    fn compute_into(
        &self,
        input: &Step1LocalInput,
        result: &mut CrossProductPartialResult,
    ) -> Result<(), AlsError> {
        let pm = input
            .partial_model
            .as_ref()
            .ok_or(AlsError::NullPartialModel)?;
        let cp = result
            .cross_product
            .as_mut()
            .ok_or(AlsError::NullPartialResult("crossProduct"))?;
        cp.data_mut().fill(0.0);
        add_cross_product(cp.data_mut(), pm.factors());
        Ok(())
    }

    fn check_partial_result(
        &self,
        _input: &Step1LocalInput,
        result: &CrossProductPartialResult,
    ) -> Result<(), AlsError> {
        result.check(&self.param)
    }
}

// ─── Step 2 ──────────────────────────────────────────────────────────

/// Input of [`Step2Master`]: one cross-product per node.
#[derive(Debug, Clone, Default)]
pub struct Step2MasterInput {
    cross_products: Vec<DenseTable>,
}

impl Step2MasterInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the cross-product received from one node.
    pub fn add(&mut self, cross_product: DenseTable) {
        self.cross_products.push(cross_product);
    }

    pub fn len(&self) -> usize {
        self.cross_products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cross_products.is_empty()
    }
}

/// Step 2: sum of the nodes' cross-products.
#[derive(Debug, Clone)]
pub struct Step2Master {
    param: Parameter,
}

impl Step2Master {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

impl DistributedStep for Step2Master {
    type Input = Step2MasterInput;
    type PartialResult = CrossProductPartialResult;
    const NAME: &'static str = "step2Master";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &Step2MasterInput) -> Result<(), AlsError> {
        if input.cross_products.is_empty() {
            return Err(AlsError::EmptyCollection("inputOfStep2FromStep1"));
        }
        for cp in &input.cross_products {
            self.param.check_cross_product(cp, "inputOfStep2FromStep1")?;
        }
        Ok(())
    }

    fn allocate(&self, _input: &Step2MasterInput) -> Result<Self::PartialResult, AlsError> {
        Ok(CrossProductPartialResult::allocate(&self.param))
    }

    fn compute_into(
        &self,
        input: &Step2MasterInput,
        result: &mut CrossProductPartialResult,
    ) -> Result<(), AlsError> {
        let sum = result
            .cross_product
            .as_mut()
            .ok_or(AlsError::NullPartialResult("crossProduct"))?;
        sum.data_mut().fill(0.0);
        for cp in &input.cross_products {
            for (acc, v) in sum.data_mut().iter_mut().zip(cp.data()) {
                *acc += v;
            }
        }
        Ok(())
    }

    fn check_partial_result(
        &self,
        _input: &Step2MasterInput,
        result: &CrossProductPartialResult,
    ) -> Result<(), AlsError> {
        result.check(&self.param)
    }
}

// ─── Step 3 ──────────────────────────────────────────────────────────

/// Input of [`Step3Local`].
#[derive(Debug, Clone, Default)]
pub struct Step3LocalInput {
    partial_model: Option<PartialModel>,
    blocks_to_node: Option<KeyValueCollection<IndexTable>>,
    offset: Option<usize>,
}

impl Step3LocalInput {
    pub fn new(
        partial_model: PartialModel,
        blocks_to_node: KeyValueCollection<IndexTable>,
        offset: usize,
    ) -> Self {
        Self {
            partial_model: Some(partial_model),
            blocks_to_node: Some(blocks_to_node),
            offset: Some(offset),
        }
    }

    pub fn set_partial_model(&mut self, partial_model: PartialModel) {
        self.partial_model = Some(partial_model);
    }

    /// For each destination node, the local rows it needs.
    pub fn set_blocks_to_node(&mut self, blocks: KeyValueCollection<IndexTable>) {
        self.blocks_to_node = Some(blocks);
    }

    /// Global index of the first local row.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }

    pub fn partial_model(&self) -> Option<&PartialModel> {
        self.partial_model.as_ref()
    }

    pub fn blocks_to_node(&self) -> Option<&KeyValueCollection<IndexTable>> {
        self.blocks_to_node.as_ref()
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

/// Partial models addressed to destination nodes.
#[derive(Debug, Clone, Default)]
pub struct Step3PartialResult {
    output_for_step4: Option<KeyValueCollection<PartialModel>>,
}

impl Step3PartialResult {
    pub fn output_for_step4(&self) -> Option<&KeyValueCollection<PartialModel>> {
        self.output_for_step4.as_ref()
    }

    pub fn into_output_for_step4(self) -> Result<KeyValueCollection<PartialModel>, AlsError> {
        self.output_for_step4
            .ok_or(AlsError::NullPartialResult("outputOfStep3ForStep4"))
    }
}

/// Step 3: split the local factor rows by destination node.
#[derive(Debug, Clone)]
pub struct Step3Local {
    param: Parameter,
}

impl Step3Local {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

fn step3_parts(
    input: &Step3LocalInput,
) -> Result<(&PartialModel, &KeyValueCollection<IndexTable>, usize), AlsError> {
    let pm = input
        .partial_model
        .as_ref()
        .ok_or(AlsError::NullPartialModel)?;
    let blocks = input
        .blocks_to_node
        .as_ref()
        .ok_or(AlsError::NullInput("partialModelBlocksToNode"))?;
    let offset = input.offset.ok_or(AlsError::NullInput("offset"))?;
    Ok((pm, blocks, offset))
}

impl DistributedStep for Step3Local {
    type Input = Step3LocalInput;
    type PartialResult = Step3PartialResult;
    const NAME: &'static str = "step3Local";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &Step3LocalInput) -> Result<(), AlsError> {
        let (pm, blocks, _) = step3_parts(input)?;
        pm.check(&self.param, "partialModel")?;
        blocks.check_not_empty("partialModelBlocksToNode")?;
        let n_rows = pm.n_rows();
        for (node, rows) in blocks.iter() {
            if let Some(&bad) = rows.iter().find(|&&r| r >= n_rows) {
                return Err(AlsError::IncorrectIndex(format!(
                    "row {} requested by node {} exceeds local block of {} rows",
                    bad, node, n_rows
                )));
            }
        }
        Ok(())
    }

    fn allocate(&self, input: &Step3LocalInput) -> Result<Step3PartialResult, AlsError> {
        let (_, blocks, offset) = step3_parts(input)?;
        let k = self.param.n_factors;
        let out = blocks
            .iter()
            .map(|(node, rows)| {
                let indices = rows.iter().map(|&r| offset + r).collect();
                PartialModel::from_indices(DenseTable::zeros(rows.len(), k), indices)
                    .map(|pm| (node, pm))
            })
            .collect::<Result<KeyValueCollection<_>, _>>()?;
        Ok(Step3PartialResult {
            output_for_step4: Some(out),
        })
    }

    fn compute_into(
        &self,
        input: &Step3LocalInput,
        result: &mut Step3PartialResult,
    ) -> Result<(), AlsError> {
        let (pm, blocks, _) = step3_parts(input)?;
        let out = result
            .output_for_step4
            .as_mut()
            .ok_or(AlsError::NullPartialResult("outputOfStep3ForStep4"))?;
        for (node, rows) in blocks.iter() {
            let dst = out.require_mut(node)?;
            for (dst_row, &src_row) in rows.iter().enumerate() {
                dst.factors_mut()
                    .row_mut(dst_row)
                    .copy_from_slice(pm.factors().row(src_row));
            }
        }
        Ok(())
    }

    fn check_partial_result(
        &self,
        input: &Step3LocalInput,
        result: &Step3PartialResult,
    ) -> Result<(), AlsError> {
        let (_, blocks, _) = step3_parts(input)?;
        let out = result
            .output_for_step4
            .as_ref()
            .ok_or(AlsError::NullPartialResult("outputOfStep3ForStep4"))?;
        for (node, rows) in blocks.iter() {
            let pm = out.require(node, "outputOfStep3ForStep4")?;
            pm.check(&self.param, "outputOfStep3ForStep4")?;
            if pm.n_rows() != rows.len() {
                return Err(AlsError::IncorrectTableSize {
                    name: "outputOfStep3ForStep4",
                    expected: format!("{} x {}", rows.len(), self.param.n_factors),
                    actual: pm.factors().shape_string(),
                });
            }
        }
        Ok(())
    }
}

// ─── Step 4 ──────────────────────────────────────────────────────────

/// Input of [`Step4Local`].
#[derive(Debug, Clone, Default)]
pub struct Step4LocalInput {
    partial_models: Option<KeyValueCollection<PartialModel>>,
    partial_data: Option<CsrTable>,
    cross_product: Option<DenseTable>,
    offset: Option<usize>,
}

impl Step4LocalInput {
    pub fn new(
        partial_models: KeyValueCollection<PartialModel>,
        partial_data: CsrTable,
        cross_product: DenseTable,
        offset: usize,
    ) -> Self {
        Self {
            partial_models: Some(partial_models),
            partial_data: Some(partial_data),
            cross_product: Some(cross_product),
            offset: Some(offset),
        }
    }

    /// Partial models received from every node, keyed by source node.
    pub fn set_partial_models(&mut self, partial_models: KeyValueCollection<PartialModel>) {
        self.partial_models = Some(partial_models);
    }

    /// Local ratings block: local rows × global columns of the other side.
    pub fn set_partial_data(&mut self, data: CsrTable) {
        self.partial_data = Some(data);
    }

    /// `YᵀY` from step 2.
    pub fn set_cross_product(&mut self, cross_product: DenseTable) {
        self.cross_product = Some(cross_product);
    }

    /// Global index of the first local row.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }

    pub fn partial_models(&self) -> Option<&KeyValueCollection<PartialModel>> {
        self.partial_models.as_ref()
    }

    pub fn partial_data(&self) -> Option<&CsrTable> {
        self.partial_data.as_ref()
    }

    pub fn cross_product(&self) -> Option<&DenseTable> {
        self.cross_product.as_ref()
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

/// The recomputed partial model of the local rows.
#[derive(Debug, Clone, Default)]
pub struct Step4PartialResult {
    partial_model: Option<PartialModel>,
}

impl Step4PartialResult {
    pub fn partial_model(&self) -> Option<&PartialModel> {
        self.partial_model.as_ref()
    }

    pub fn into_partial_model(self) -> Result<PartialModel, AlsError> {
        self.partial_model.ok_or(AlsError::NullPartialResult("outputOfStep4ForStep1"))
    }
}

/// Global-index lookup over the partial models received in step 4.
struct ReceivedFactors<'a> {
    rows: HashMap<usize, &'a [f64]>,
}

impl<'a> ReceivedFactors<'a> {
    fn build(models: &'a KeyValueCollection<PartialModel>) -> Result<Self, AlsError> {
        let mut rows = HashMap::new();
        for (node, pm) in models.iter() {
            for (r, &global) in pm.indices().iter().enumerate() {
                if rows.insert(global, pm.factors().row(r)).is_some() {
                    return Err(AlsError::IncorrectIndex(format!(
                        "row {} received more than once (again from node {})",
                        global, node
                    )));
                }
            }
        }
        Ok(Self { rows })
    }

    /// Every column of `data` must name a received row.
    fn check_covers(&self, data: &CsrTable) -> Result<(), AlsError> {
        match data.col_indices().iter().find(|c| !self.rows.contains_key(c)) {
            Some(col) => Err(AlsError::IncorrectIndex(format!(
                "partialData references row {} that no partial model provides",
                col
            ))),
            None => Ok(()),
        }
    }
}

impl FactorSource for ReceivedFactors<'_> {
    fn factor(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(&index).copied()
    }
}

/// Step 4: recompute the local factor block from the received partial
/// models.
#[derive(Debug, Clone)]
pub struct Step4Local {
    param: Parameter,
}

impl Step4Local {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

type Step4Parts<'a> = (
    &'a KeyValueCollection<PartialModel>,
    &'a CsrTable,
    &'a DenseTable,
    usize,
);

fn step4_parts(input: &Step4LocalInput) -> Result<Step4Parts<'_>, AlsError> {
    let models = input
        .partial_models
        .as_ref()
        .ok_or(AlsError::NullInput("partialModels"))?;
    let data = input
        .partial_data
        .as_ref()
        .ok_or(AlsError::NullInput("partialData"))?;
    let cp = input
        .cross_product
        .as_ref()
        .ok_or(AlsError::NullInput("inputOfStep4FromStep2"))?;
    let offset = input.offset.ok_or(AlsError::NullInput("offset"))?;
    Ok((models, data, cp, offset))
}

impl DistributedStep for Step4Local {
    type Input = Step4LocalInput;
    type PartialResult = Step4PartialResult;
    const NAME: &'static str = "step4Local";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &Step4LocalInput) -> Result<(), AlsError> {
        let (models, _, cp, _) = step4_parts(input)?;
        models.check_not_empty("partialModels")?;
        for pm in models.values() {
            pm.check(&self.param, "partialModels")?;
        }
        self.param.check_cross_product(cp, "inputOfStep4FromStep2")
    }

    fn allocate(&self, input: &Step4LocalInput) -> Result<Step4PartialResult, AlsError> {
        let (_, data, _, offset) = step4_parts(input)?;
        Ok(Step4PartialResult {
            partial_model: Some(PartialModel::zeros(
                data.n_rows(),
                self.param.n_factors,
                offset,
            )),
        })
    }

    fn compute_into(
        &self,
        input: &Step4LocalInput,
        result: &mut Step4PartialResult,
    ) -> Result<(), AlsError> {
        let (models, data, cp, offset) = step4_parts(input)?;
        let out = result
            .partial_model
            .as_mut()
            .ok_or(AlsError::NullPartialResult("outputOfStep4ForStep1"))?;
        let received = ReceivedFactors::build(models)?;
        received.check_covers(data)?;
        update_factors(data, offset, &received, cp, &self.param, out.factors_mut())
    }

    fn check_partial_result(
        &self,
        input: &Step4LocalInput,
        result: &Step4PartialResult,
    ) -> Result<(), AlsError> {
        let (_, data, _, _) = step4_parts(input)?;
        let pm = result
            .partial_model
            .as_ref()
            .ok_or(AlsError::NullPartialResult("outputOfStep4ForStep1"))?;
        pm.check(&self.param, "outputOfStep4ForStep1")?;
        pm.factors()
            .check_full("outputOfStep4ForStep1", Some(data.n_rows()), self.param.n_factors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::StorageLayout;

    fn param(k: usize) -> Parameter {
        Parameter {
            n_factors: k,
            alpha: 2.0,
            lambda: 0.1,
            ..Default::default()
        }
    }

    fn block(rows: &[Vec<f64>], offset: usize) -> PartialModel {
        PartialModel::from_offset(DenseTable::from_rows(rows).unwrap(), offset)
    }

    #[test]
    fn step1_computes_local_cross_product() {
        let input = Step1LocalInput::new(block(&[vec![1.0, 0.0], vec![1.0, 2.0]], 0));
        let cp = Step1Local::new(param(2))
            .compute(&input)
            .unwrap()
            .into_cross_product()
            .unwrap();
        assert_eq!(cp.data(), &[2.0, 2.0, 2.0, 4.0]);
    }

    #[test]
    fn step1_requires_partial_model() {
        let err = Step1Local::new(param(2))
            .compute(&Step1LocalInput::default())
            .unwrap_err();
        assert!(matches!(err, AlsError::NullPartialModel));
    }

    #[test]
    fn step1_rejects_factor_count_mismatch() {
        let input = Step1LocalInput::new(block(&[vec![1.0, 0.0, 0.0]], 0));
        let err = Step1Local::new(param(2)).compute(&input).unwrap_err();
        assert!(matches!(err, AlsError::IncorrectNumberOfFactors { .. }));
    }

    #[test]
    fn step2_sums_cross_products() {
        let mut input = Step2MasterInput::new();
        input.add(DenseTable::from_vec(2, 2, vec![1.0, 2.0, 2.0, 5.0]).unwrap());
        input.add(DenseTable::from_vec(2, 2, vec![3.0, 0.0, 0.0, 1.0]).unwrap());
        let sum = Step2Master::new(param(2))
            .compute(&input)
            .unwrap()
            .into_cross_product()
            .unwrap();
        assert_eq!(sum.data(), &[4.0, 2.0, 2.0, 6.0]);
    }

    #[test]
    fn step2_rejects_empty_and_packed_inputs() {
        let step = Step2Master::new(param(2));
        assert!(matches!(
            step.compute(&Step2MasterInput::new()),
            Err(AlsError::EmptyCollection(_))
        ));

        let mut input = Step2MasterInput::new();
        input.add(
            DenseTable::packed(2, StorageLayout::PackedSymmetric, vec![1.0, 2.0, 3.0]).unwrap(),
        );
        assert!(matches!(
            step.compute(&input),
            Err(AlsError::IncorrectTableLayout(_))
        ));
    }

    #[test]
    fn step3_routes_rows_with_global_indices() {
        let pm = block(&[vec![1.0], vec![2.0], vec![3.0]], 10);
        let blocks: KeyValueCollection<IndexTable> =
            [(0, vec![2]), (1, vec![0, 1]), (2, vec![])].into_iter().collect();
        let input = Step3LocalInput::new(pm, blocks, 10);
        let out = Step3Local::new(param(1))
            .compute(&input)
            .unwrap()
            .into_output_for_step4()
            .unwrap();

        assert_eq!(out.len(), 3);
        let to0 = out.get(0).unwrap();
        assert_eq!(to0.indices(), &[12]);
        assert_eq!(to0.factors().data(), &[3.0]);
        let to1 = out.get(1).unwrap();
        assert_eq!(to1.indices(), &[10, 11]);
        assert_eq!(to1.factors().data(), &[1.0, 2.0]);
        assert_eq!(out.get(2).unwrap().n_rows(), 0);
    }

    #[test]
    fn step3_rejects_out_of_range_rows() {
        let pm = block(&[vec![1.0]], 0);
        let blocks: KeyValueCollection<IndexTable> = [(0, vec![1])].into_iter().collect();
        let err = Step3Local::new(param(1))
            .compute(&Step3LocalInput::new(pm, blocks, 0))
            .unwrap_err();
        assert!(matches!(err, AlsError::IncorrectIndex(_)));
    }

    #[test]
    fn step3_requires_offset() {
        let mut input = Step3LocalInput::default();
        input.set_partial_model(block(&[vec![1.0]], 0));
        input.set_blocks_to_node([(0, vec![0])].into_iter().collect());
        let err = Step3Local::new(param(1)).compute(&input).unwrap_err();
        assert!(matches!(err, AlsError::NullInput("offset")));
    }

    #[test]
    fn step4_matches_direct_kernel_call() {
        let p = param(2);
        let items = DenseTable::from_rows(&[vec![0.5, 1.0], vec![1.0, 0.0], vec![0.2, 0.3]]).unwrap();
        let yty = crate::kernel::cross_product(&items);
        // two users, columns are global item indices
        let data = CsrTable::new(2, 3, vec![1.0, 3.0, 2.0], vec![0, 2, 1], vec![0, 2, 3]).unwrap();

        let mut expected = DenseTable::zeros(2, 2);
        update_factors(&data, 4, &items, &yty, &p, &mut expected).unwrap();

        // receive items {0, 2} from node 0 and {1} from node 1
        let received: KeyValueCollection<PartialModel> = [
            (
                0,
                PartialModel::from_indices(
                    DenseTable::from_rows(&[items.row(0).to_vec(), items.row(2).to_vec()]).unwrap(),
                    vec![0, 2],
                )
                .unwrap(),
            ),
            (1, block(&[items.row(1).to_vec()], 1)),
        ]
        .into_iter()
        .collect();

        let pm = Step4Local::new(p)
            .compute(&Step4LocalInput::new(received, data, yty, 4))
            .unwrap()
            .into_partial_model()
            .unwrap();
        assert_eq!(pm.indices(), &[4, 5]);
        assert_eq!(pm.factors(), &expected);
    }

    #[test]
    fn step4_detects_missing_and_duplicate_rows() {
        let p = param(1);
        let data = CsrTable::new(1, 3, vec![1.0], vec![2], vec![0, 1]).unwrap();
        let yty = DenseTable::from_vec(1, 1, vec![1.0]).unwrap();

        let missing: KeyValueCollection<PartialModel> =
            [(0, block(&[vec![1.0]], 0))].into_iter().collect();
        let err = Step4Local::new(p.clone())
            .compute(&Step4LocalInput::new(missing, data.clone(), yty.clone(), 0))
            .unwrap_err();
        assert!(format!("{}", err).contains("no partial model provides"));

        let duplicate: KeyValueCollection<PartialModel> =
            [(0, block(&[vec![1.0]], 2)), (1, block(&[vec![1.0]], 2))]
                .into_iter()
                .collect();
        let err = Step4Local::new(p)
            .compute(&Step4LocalInput::new(duplicate, data, yty, 0))
            .unwrap_err();
        assert!(format!("{}", err).contains("more than once"));
    }

    #[test]
    fn step4_requires_all_inputs() {
        let err = Step4Local::new(param(1))
            .compute(&Step4LocalInput::default())
            .unwrap_err();
        assert!(matches!(err, AlsError::NullInput("partialModels")));
    }
}
