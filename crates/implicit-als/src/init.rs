//! Initial factors, batch and distributed.
//!
//! Item factors start with the item's mean observed rating followed by
//! uniform `[0, 1)` values drawn from a stream seeded by the global item
//! index, so every partitioning yields the same starting point. User factors
//! start at zero; the first user update overwrites them.
//!
//! Distributed initialisation runs in two local steps. [`InitStep1Local`]
//! runs on the node owning an item block and cuts its ratings into one block
//! per user partition; [`InitStep2Local`] runs on the node owning a user
//! block and reassembles its users' ratings from the blocks it received.
//! Both also emit the step-3 routing tables used by every training epoch.

use crate::collection::KeyValueCollection;
use crate::distributed::DistributedStep;
use crate::error::AlsError;
use crate::table::{CsrTable, DenseTable, IndexTable};
use crate::types::{Model, Parameter, PartialModel, Partition, TrainingData};
use crate::util::init_factor_row;

/// Mean of the stored values of every row (0 for empty rows).
fn row_means(data: &CsrTable) -> Vec<f64> {
    (0..data.n_rows())
        .map(|i| {
            let (_, vals) = data.row(i);
            if vals.is_empty() {
                0.0
            } else {
                vals.iter().sum::<f64>() / vals.len() as f64
            }
        })
        .collect()
}

/// Fill the initial factors of item rows `offset..offset + n` of `items`
/// (an item-major ratings block).
fn init_item_factors(items: &CsrTable, offset: usize, param: &Parameter, out: &mut DenseTable) {
    for (i, mean) in row_means(items).into_iter().enumerate() {
        init_factor_row(param.seed, offset + i, mean, out.row_mut(i));
    }
}

/// Local rows of `block` that hold at least one entry.
fn non_empty_rows(block: &CsrTable) -> IndexTable {
    (0..block.n_rows()).filter(|&i| block.row_nnz(i) > 0).collect()
}

/// Initial model for batch training.
pub fn initialize(data: TrainingData<'_>, param: &Parameter) -> Result<Model, AlsError> {
    param.validate()?;
    data.check_method(param.method)?;
    let items = data.to_csr().transpose();

    let mut items_factors = DenseTable::zeros(items.n_rows(), param.n_factors);
    init_item_factors(&items, 0, param, &mut items_factors);
    let users_factors = DenseTable::zeros(data.n_users(), param.n_factors);
    Model::new(users_factors, items_factors)
}

// ─── Init step 1 ─────────────────────────────────────────────────────

/// Input of [`InitStep1Local`].
#[derive(Debug, Clone, Default)]
pub struct InitStep1LocalInput {
    data: Option<CsrTable>,
    offset: Option<usize>,
}

impl InitStep1LocalInput {
    pub fn new(data: CsrTable, offset: usize) -> Self {
        Self {
            data: Some(data),
            offset: Some(offset),
        }
    }

    /// Item-block ratings: local items × global users.
    pub fn set_data(&mut self, data: CsrTable) {
        self.data = Some(data);
    }

    /// Global index of the first local item.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }

    pub fn data(&self) -> Option<&CsrTable> {
        self.data.as_ref()
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

/// Results of [`InitStep1Local`].
#[derive(Debug, Clone, Default)]
pub struct InitStep1PartialResult {
    partial_model: Option<PartialModel>,
    output_for_step2: Option<KeyValueCollection<CsrTable>>,
    blocks_to_node: Option<KeyValueCollection<IndexTable>>,
    offsets: Option<Vec<usize>>,
}

impl InitStep1PartialResult {
    /// Initial factors of the local items.
    pub fn partial_model(&self) -> Option<&PartialModel> {
        self.partial_model.as_ref()
    }

    /// Ratings of the local items cut by user block, keyed by the node that
    /// owns the users.
    pub fn output_for_step2(&self) -> Option<&KeyValueCollection<CsrTable>> {
        self.output_for_step2.as_ref()
    }

    /// Local item rows each node needs during the user update.
    pub fn blocks_to_node(&self) -> Option<&KeyValueCollection<IndexTable>> {
        self.blocks_to_node.as_ref()
    }

    /// Boundaries of the user partition.
    pub fn offsets(&self) -> Option<&[usize]> {
        self.offsets.as_deref()
    }

    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> Result<
        (
            PartialModel,
            KeyValueCollection<CsrTable>,
            KeyValueCollection<IndexTable>,
            Vec<usize>,
        ),
        AlsError,
    > {
        Ok((
            self.partial_model
                .ok_or(AlsError::NullPartialResult("partialModel"))?,
            self.output_for_step2
                .ok_or(AlsError::NullPartialResult("outputOfInitForComputeStep2"))?,
            self.blocks_to_node
                .ok_or(AlsError::NullPartialResult("outputOfStep1ForStep3"))?,
            self.offsets.ok_or(AlsError::NullPartialResult("offsets"))?,
        ))
    }
}

/// Init step 1: initial item factors and the user-side cut of the local
/// item block.
#[derive(Debug, Clone)]
pub struct InitStep1Local {
    param: Parameter,
    full_n_users: usize,
    partition: Partition,
}

impl InitStep1Local {
    pub fn new(param: Parameter, full_n_users: usize, partition: Partition) -> Self {
        Self {
            param,
            full_n_users,
            partition,
        }
    }
}

fn init1_parts(input: &InitStep1LocalInput) -> Result<(&CsrTable, usize), AlsError> {
    let data = input.data.as_ref().ok_or(AlsError::NullInput("data"))?;
    let offset = input.offset.ok_or(AlsError::NullInput("offset"))?;
    Ok((data, offset))
}

impl DistributedStep for InitStep1Local {
    type Input = InitStep1LocalInput;
    type PartialResult = InitStep1PartialResult;
    const NAME: &'static str = "initStep1Local";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &InitStep1LocalInput) -> Result<(), AlsError> {
        let (data, _) = init1_parts(input)?;
        if self.full_n_users == 0 {
            return Err(AlsError::InvalidParameter("full_n_users must be > 0".into()));
        }
        if data.n_cols() != self.full_n_users {
            return Err(AlsError::IncorrectTableSize {
                name: "data",
                expected: format!("any x {}", self.full_n_users),
                actual: format!("{} x {}", data.n_rows(), data.n_cols()),
            });
        }
        self.partition.offsets(self.full_n_users)?;
        Ok(())
    }

    fn allocate(&self, input: &InitStep1LocalInput) -> Result<InitStep1PartialResult, AlsError> {
        let (data, offset) = init1_parts(input)?;
        let offsets = self.partition.offsets(self.full_n_users)?;
        Ok(InitStep1PartialResult {
            partial_model: Some(PartialModel::zeros(
                data.n_rows(),
                self.param.n_factors,
                offset,
            )),
            output_for_step2: Some(KeyValueCollection::new()),
            blocks_to_node: Some(KeyValueCollection::new()),
            offsets: Some(offsets),
        })
    }

    fn compute_into(
        &self,
        input: &InitStep1LocalInput,
        result: &mut InitStep1PartialResult,
    ) -> Result<(), AlsError> {
        let (data, offset) = init1_parts(input)?;
        let pm = result
            .partial_model
            .as_mut()
            .ok_or(AlsError::NullPartialResult("partialModel"))?;
        init_item_factors(data, offset, &self.param, pm.factors_mut());

        let offsets = result
            .offsets
            .as_ref()
            .ok_or(AlsError::NullPartialResult("offsets"))?;
        let blocks = result
            .output_for_step2
            .as_mut()
            .ok_or(AlsError::NullPartialResult("outputOfInitForComputeStep2"))?;
        let routing = result
            .blocks_to_node
            .as_mut()
            .ok_or(AlsError::NullPartialResult("outputOfStep1ForStep3"))?;
        for (node, w) in offsets.windows(2).enumerate() {
            let block = data.column_block(w[0], w[1]);
            routing.insert(node, non_empty_rows(&block));
            blocks.insert(node, block);
        }
        Ok(())
    }

    fn check_partial_result(
        &self,
        input: &InitStep1LocalInput,
        result: &InitStep1PartialResult,
    ) -> Result<(), AlsError> {
        let (data, _) = init1_parts(input)?;
        let pm = result
            .partial_model
            .as_ref()
            .ok_or(AlsError::NullPartialResult("partialModel"))?;
        pm.check(&self.param, "partialModel")?;
        pm.factors()
            .check_full("partialModel", Some(data.n_rows()), self.param.n_factors)?;

        let n_parts = self.partition.n_parts();
        let blocks = result
            .output_for_step2
            .as_ref()
            .ok_or(AlsError::NullPartialResult("outputOfInitForComputeStep2"))?;
        let routing = result
            .blocks_to_node
            .as_ref()
            .ok_or(AlsError::NullPartialResult("outputOfStep1ForStep3"))?;
        if blocks.len() != n_parts || routing.len() != n_parts {
            return Err(AlsError::IncorrectTableSize {
                name: "outputOfInitForComputeStep2",
                expected: format!("{} blocks", n_parts),
                actual: format!("{} blocks", blocks.len()),
            });
        }
        Ok(())
    }
}

// ─── Init step 2 ─────────────────────────────────────────────────────

/// Input of [`InitStep2Local`].
#[derive(Debug, Clone, Default)]
pub struct InitStep2LocalInput {
    blocks: Option<KeyValueCollection<CsrTable>>,
    item_offsets: Option<Vec<usize>>,
}

impl InitStep2LocalInput {
    pub fn new(blocks: KeyValueCollection<CsrTable>, item_offsets: Vec<usize>) -> Self {
        Self {
            blocks: Some(blocks),
            item_offsets: Some(item_offsets),
        }
    }

    /// Blocks received from init step 1, keyed by source node.
    pub fn set_blocks(&mut self, blocks: KeyValueCollection<CsrTable>) {
        self.blocks = Some(blocks);
    }

    /// Boundaries of the item partition.
    pub fn set_item_offsets(&mut self, item_offsets: Vec<usize>) {
        self.item_offsets = Some(item_offsets);
    }

    pub fn blocks(&self) -> Option<&KeyValueCollection<CsrTable>> {
        self.blocks.as_ref()
    }

    pub fn item_offsets(&self) -> Option<&[usize]> {
        self.item_offsets.as_deref()
    }
}

/// Results of [`InitStep2Local`].
#[derive(Debug, Clone, Default)]
pub struct InitStep2PartialResult {
    transposed_data: Option<CsrTable>,
    blocks_to_node: Option<KeyValueCollection<IndexTable>>,
}

impl InitStep2PartialResult {
    /// Ratings of the local users: local users × global items.
    pub fn transposed_data(&self) -> Option<&CsrTable> {
        self.transposed_data.as_ref()
    }

    /// Local user rows each node needs during the item update.
    pub fn blocks_to_node(&self) -> Option<&KeyValueCollection<IndexTable>> {
        self.blocks_to_node.as_ref()
    }

    pub fn into_parts(self) -> Result<(CsrTable, KeyValueCollection<IndexTable>), AlsError> {
        Ok((
            self.transposed_data
                .ok_or(AlsError::NullPartialResult("transposedData"))?,
            self.blocks_to_node
                .ok_or(AlsError::NullPartialResult("outputOfStep1ForStep3"))?,
        ))
    }
}

/// Init step 2: reassemble the local users' ratings.
#[derive(Debug, Clone)]
pub struct InitStep2Local {
    param: Parameter,
}

impl InitStep2Local {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

fn init2_parts(
    input: &InitStep2LocalInput,
) -> Result<(&KeyValueCollection<CsrTable>, &[usize]), AlsError> {
    let blocks = input
        .blocks
        .as_ref()
        .ok_or(AlsError::NullInput("inputOfStep2FromStep1"))?;
    let offsets = input
        .item_offsets
        .as_deref()
        .ok_or(AlsError::NullInput("offsets"))?;
    Ok((blocks, offsets))
}

impl DistributedStep for InitStep2Local {
    type Input = InitStep2LocalInput;
    type PartialResult = InitStep2PartialResult;
    const NAME: &'static str = "initStep2Local";

    fn parameter(&self) -> &Parameter {
        &self.param
    }

    fn check_input(&self, input: &InitStep2LocalInput) -> Result<(), AlsError> {
        let (blocks, offsets) = init2_parts(input)?;
        blocks.check_not_empty("inputOfStep2FromStep1")?;
        let n_items = offsets.last().copied().unwrap_or(0);
        Partition::Offsets(offsets.to_vec()).offsets(n_items)?;

        let n_users = blocks.values().next().map_or(0, CsrTable::n_cols);
        for (node, block) in blocks.iter() {
            if node + 1 >= offsets.len() {
                return Err(AlsError::IncorrectIndex(format!(
                    "block from node {} but the item partition has {} blocks",
                    node,
                    offsets.len() - 1
                )));
            }
            let rows = offsets[node + 1] - offsets[node];
            if block.n_rows() != rows || block.n_cols() != n_users {
                return Err(AlsError::IncorrectTableSize {
                    name: "inputOfStep2FromStep1",
                    expected: format!("{} x {}", rows, n_users),
                    actual: format!("{} x {}", block.n_rows(), block.n_cols()),
                });
            }
        }
        Ok(())
    }

    fn allocate(&self, _input: &InitStep2LocalInput) -> Result<InitStep2PartialResult, AlsError> {
        Ok(InitStep2PartialResult {
            transposed_data: Some(CsrTable::empty(0, 0)),
            blocks_to_node: Some(KeyValueCollection::new()),
        })
    }

    fn compute_into(
        &self,
        input: &InitStep2LocalInput,
        result: &mut InitStep2PartialResult,
    ) -> Result<(), AlsError> {
        let (blocks, offsets) = init2_parts(input)?;
        let n_items = offsets.last().copied().unwrap_or(0);
        let n_users = blocks.values().next().map_or(0, CsrTable::n_cols);

        let mut triplets = Vec::new();
        let routing = result
            .blocks_to_node
            .as_mut()
            .ok_or(AlsError::NullPartialResult("outputOfStep1ForStep3"))?;
        for (node, block) in blocks.iter() {
            let by_user = block.transpose();
            routing.insert(node, non_empty_rows(&by_user));
            for i in 0..block.n_rows() {
                let (users, vals) = block.row(i);
                for (&u, &v) in users.iter().zip(vals) {
                    triplets.push((u, offsets[node] + i, v));
                }
            }
        }

        let data = result
            .transposed_data
            .as_mut()
            .ok_or(AlsError::NullPartialResult("transposedData"))?;
        *data = CsrTable::from_triplets(n_users, n_items, &triplets)?;
        Ok(())
    }

    fn check_partial_result(
        &self,
        input: &InitStep2LocalInput,
        result: &InitStep2PartialResult,
    ) -> Result<(), AlsError> {
        let (blocks, _) = init2_parts(input)?;
        result
            .transposed_data
            .as_ref()
            .ok_or(AlsError::NullPartialResult("transposedData"))?;
        let routing = result
            .blocks_to_node
            .as_ref()
            .ok_or(AlsError::NullPartialResult("outputOfStep1ForStep3"))?;
        if routing.len() != blocks.len() {
            return Err(AlsError::IncorrectTableSize {
                name: "outputOfStep1ForStep3",
                expected: format!("{} blocks", blocks.len()),
                actual: format!("{} blocks", routing.len()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(k: usize) -> Parameter {
        Parameter {
            n_factors: k,
            seed: 3,
            ..Default::default()
        }
    }

    // 4 users × 3 items
    fn ratings() -> CsrTable {
        CsrTable::from_triplets(
            4,
            3,
            &[
                (0, 0, 1.0),
                (0, 2, 3.0),
                (1, 1, 2.0),
                (2, 0, 5.0),
                (3, 2, 1.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn batch_init_uses_item_means() {
        let model = initialize(TrainingData::Csr(&ratings()), &param(3)).unwrap();
        assert_eq!(model.n_users(), 4);
        assert_eq!(model.n_items(), 3);
        assert_eq!(model.item(0)[0], 3.0);
        assert_eq!(model.item(1)[0], 2.0);
        assert_eq!(model.item(2)[0], 2.0);
        assert!(model.users_factors().data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn batch_init_checks_method() {
        let dense = ratings().to_dense();
        let err = initialize(TrainingData::Dense(&dense), &param(2)).unwrap_err();
        assert!(matches!(err, AlsError::UnsupportedMethod { .. }));
    }

    #[test]
    fn distributed_init_matches_batch_factors() {
        let r = ratings();
        let items = r.transpose();
        let batch = initialize(TrainingData::Csr(&r), &param(3)).unwrap();

        // item block 1..3 on one node, users split in two blocks
        let step = InitStep1Local::new(param(3), 4, Partition::Equal(2));
        let out = step
            .compute(&InitStep1LocalInput::new(items.row_block(1, 3), 1))
            .unwrap();
        let pm = out.partial_model().unwrap();
        assert_eq!(pm.indices(), &[1, 2]);
        assert_eq!(pm.factors().row(0), batch.item(1));
        assert_eq!(pm.factors().row(1), batch.item(2));
    }

    #[test]
    fn init_step1_cuts_by_user_block() {
        let items = ratings().transpose();
        let step = InitStep1Local::new(param(2), 4, Partition::Equal(2));
        let (_, blocks, routing, offsets) = step
            .compute(&InitStep1LocalInput::new(items.clone(), 0))
            .unwrap()
            .into_parts()
            .unwrap();

        assert_eq!(offsets, vec![0, 2, 4]);
        // users 0,1 rate items 0,1,2; users 2,3 rate items 0,2
        assert_eq!(routing.get(0).unwrap(), &vec![0, 1, 2]);
        assert_eq!(routing.get(1).unwrap(), &vec![0, 2]);
        let second = blocks.get(1).unwrap();
        assert_eq!((second.n_rows(), second.n_cols()), (3, 2));
        assert_eq!(second.row(0), (&[0usize][..], &[5.0][..]));
    }

    #[test]
    fn init_step1_requires_matching_user_count() {
        let items = ratings().transpose();
        let step = InitStep1Local::new(param(2), 5, Partition::Equal(2));
        let err = step
            .compute(&InitStep1LocalInput::new(items, 0))
            .unwrap_err();
        assert!(matches!(err, AlsError::IncorrectTableSize { name: "data", .. }));

        let step = InitStep1Local::new(param(2), 4, Partition::Equal(2));
        let mut input = InitStep1LocalInput::default();
        input.set_data(ratings().transpose());
        assert!(matches!(
            step.compute(&input),
            Err(AlsError::NullInput("offset"))
        ));
    }

    #[test]
    fn init_step2_reassembles_user_rows() {
        let r = ratings();
        let items = r.transpose();
        let user_partition = Partition::Equal(2);
        let item_offsets = vec![0, 1, 3];

        // both item nodes send their block for user block 1 (users 2, 3)
        let mut received = KeyValueCollection::new();
        for (node, w) in item_offsets.windows(2).enumerate() {
            let step = InitStep1Local::new(param(2), 4, user_partition.clone());
            let (_, mut blocks, _, _) = step
                .compute(&InitStep1LocalInput::new(items.row_block(w[0], w[1]), w[0]))
                .unwrap()
                .into_parts()
                .unwrap();
            received.insert(node, blocks.remove(1).unwrap());
        }

        let mut input = InitStep2LocalInput::default();
        input.set_blocks(received);
        input.set_item_offsets(item_offsets);
        let (data, routing) = InitStep2Local::new(param(2))
            .compute(&input)
            .unwrap()
            .into_parts()
            .unwrap();
        assert_eq!(data, r.row_block(2, 4));
        // user 2 rates item 0 (node 0); user 3 rates item 2 (node 1)
        assert_eq!(routing.get(0).unwrap(), &vec![0]);
        assert_eq!(routing.get(1).unwrap(), &vec![1]);
    }

    #[test]
    fn init_step2_rejects_misshaped_blocks() {
        let received: KeyValueCollection<CsrTable> =
            [(0, CsrTable::empty(2, 2))].into_iter().collect();
        let err = InitStep2Local::new(param(2))
            .compute(&InitStep2LocalInput::new(received, vec![0, 1]))
            .unwrap_err();
        assert!(matches!(err, AlsError::IncorrectTableSize { .. }));

        let err = InitStep2Local::new(param(2))
            .compute(&InitStep2LocalInput::default())
            .unwrap_err();
        assert!(matches!(err, AlsError::NullInput(_)));
    }
}
