//! In-process bulk-synchronous driver for distributed training.
//!
//! [`Driver`] plays both the master and every worker node: it partitions
//! users and items into blocks, runs the two initialisation steps, then
//! alternates user and item epochs of steps 1–4, moving each step-3 output
//! to the step-4 input of its destination node. With the `rayon` feature the
//! local steps of all nodes run in parallel within each superstep.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::collection::KeyValueCollection;
use crate::distributed::{
    DistributedStep, Step1Local, Step1LocalInput, Step2Master, Step2MasterInput, Step3Local,
    Step3LocalInput, Step4Local, Step4LocalInput,
};
use crate::error::AlsError;
use crate::init::{InitStep1Local, InitStep1LocalInput, InitStep2Local, InitStep2LocalInput};
use crate::metrics::implicit_loss;
use crate::table::{CsrTable, DenseTable, IndexTable};
use crate::types::{Model, Parameter, PartialModel, Partition};

/// Run `f` on every node's state, in parallel when `rayon` is enabled.
fn map_nodes<T, R, F>(nodes: &[T], f: F) -> Result<Vec<R>, AlsError>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> Result<R, AlsError> + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        nodes.par_iter().enumerate().map(|(k, t)| f(k, t)).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        nodes.iter().enumerate().map(|(k, t)| f(k, t)).collect()
    }
}

/// Per-side state of every node (one side is users, the other items).
///
/// The step inputs live for the whole run; only their partial models,
/// partial-model collections and cross-products change between epochs.
#[derive(Debug)]
struct Side {
    /// Step-1 input of every node, holding its current factor block.
    step1: Vec<Step1LocalInput>,
    /// Step-3 input of every node: the same factor block plus the routing
    /// of local rows to the nodes of the other side.
    step3: Vec<Step3LocalInput>,
    /// Step-4 input of every node, holding its ratings block.
    step4: Vec<Step4LocalInput>,
}

impl Side {
    fn new(
        offsets: &[usize],
        models: Vec<PartialModel>,
        routing: Vec<KeyValueCollection<IndexTable>>,
        data: Vec<CsrTable>,
    ) -> Self {
        let step3 = models
            .iter()
            .zip(routing)
            .zip(offsets)
            .map(|((pm, r), &offset)| Step3LocalInput::new(pm.clone(), r, offset))
            .collect();
        let step1 = models.into_iter().map(Step1LocalInput::new).collect();
        let step4 = data
            .into_iter()
            .zip(offsets)
            .map(|(d, &offset)| {
                let mut input = Step4LocalInput::default();
                input.set_partial_data(d);
                input.set_offset(offset);
                input
            })
            .collect();
        Self {
            step1,
            step3,
            step4,
        }
    }

    fn set_models(&mut self, models: Vec<PartialModel>) {
        for ((s1, s3), pm) in self.step1.iter_mut().zip(&mut self.step3).zip(models) {
            s3.set_partial_model(pm.clone());
            s1.set_partial_model(pm);
        }
    }

    /// Stack the node blocks into one factor table.
    fn assemble(&self, n_factors: usize) -> Result<DenseTable, AlsError> {
        let mut n_rows = 0;
        let mut data = Vec::new();
        for input in &self.step1 {
            let pm = input.partial_model().ok_or(AlsError::NullPartialModel)?;
            n_rows += pm.n_rows();
            data.extend_from_slice(pm.factors().data());
        }
        DenseTable::from_vec(n_rows, n_factors, data)
    }
}

/// Distributed training coordinator.
#[derive(Debug, Clone)]
pub struct Driver {
    param: Parameter,
    users: Partition,
    items: Partition,
}

impl Driver {
    /// Split users and items into `n_nodes` equal blocks each.
    pub fn new(param: Parameter, n_nodes: usize) -> Self {
        Self::with_partitions(param, Partition::Equal(n_nodes), Partition::Equal(n_nodes))
    }

    /// Use explicit partitions; both must have the same number of blocks.
    pub fn with_partitions(param: Parameter, users: Partition, items: Partition) -> Self {
        Self {
            param,
            users,
            items,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.users.n_parts()
    }

    /// Train on a full users × items rating table.
    pub fn train(&self, ratings: &CsrTable) -> Result<Model, AlsError> {
        let param = &self.param;
        param.validate()?;
        if self.users.n_parts() != self.items.n_parts() {
            return Err(AlsError::InvalidParameter(format!(
                "user partition has {} blocks but item partition has {}",
                self.users.n_parts(),
                self.items.n_parts()
            )));
        }
        let user_offsets = self.users.offsets(ratings.n_rows())?;
        let item_offsets = self.items.offsets(ratings.n_cols())?;

        crate::info(&format!(
            "distributed training on {} nodes: {} users x {} items ({} ratings)",
            self.n_nodes(),
            ratings.n_rows(),
            ratings.n_cols(),
            ratings.nnz()
        ));

        let (mut users, mut items) = self.initialize(ratings, user_offsets, item_offsets)?;

        for iter in 0..param.max_iterations {
            update_side(param, &mut users, &items)?;
            update_side(param, &mut items, &users)?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let model = Model::new(
                    users.assemble(param.n_factors)?,
                    items.assemble(param.n_factors)?,
                )?;
                let loss = implicit_loss(ratings, &model, param)?;
                tracing::debug!(iteration = iter + 1, loss, "epoch finished");
            }
        }

        crate::info(&format!("done after {} iterations", param.max_iterations));
        Model::new(
            users.assemble(param.n_factors)?,
            items.assemble(param.n_factors)?,
        )
    }

    /// Run both initialisation steps and build each side's node state.
    fn initialize(
        &self,
        ratings: &CsrTable,
        user_offsets: Vec<usize>,
        item_offsets: Vec<usize>,
    ) -> Result<(Side, Side), AlsError> {
        let param = &self.param;
        let by_item = ratings.transpose();
        let item_blocks: Vec<CsrTable> = item_offsets
            .windows(2)
            .map(|w| by_item.row_block(w[0], w[1]))
            .collect();

        let init1 = InitStep1Local::new(param.clone(), ratings.n_rows(), self.users.clone());
        let init1_out = map_nodes(&item_blocks, |j, block| {
            init1
                .compute(&InitStep1LocalInput::new(block.clone(), item_offsets[j]))?
                .into_parts()
        })?;

        let n_nodes = self.n_nodes();
        let mut item_models = Vec::with_capacity(n_nodes);
        let mut item_routing = Vec::with_capacity(n_nodes);
        let mut inboxes: Vec<KeyValueCollection<CsrTable>> =
            (0..n_nodes).map(|_| KeyValueCollection::new()).collect();
        for (j, (pm, blocks, routing, _)) in init1_out.into_iter().enumerate() {
            for (k, block) in blocks {
                inboxes[k].insert(j, block);
            }
            item_models.push(pm);
            item_routing.push(routing);
        }

        let init2 = InitStep2Local::new(param.clone());
        let init2_out = map_nodes(&inboxes, |_, inbox| {
            init2
                .compute(&InitStep2LocalInput::new(inbox.clone(), item_offsets.clone()))?
                .into_parts()
        })?;
        let (user_blocks, user_routing): (Vec<_>, Vec<_>) = init2_out.into_iter().unzip();

        let user_models = user_offsets
            .windows(2)
            .map(|w| PartialModel::zeros(w[1] - w[0], param.n_factors, w[0]))
            .collect();

        let users = Side::new(&user_offsets, user_models, user_routing, user_blocks);
        let items = Side::new(&item_offsets, item_models, item_routing, item_blocks);
        Ok((users, items))
    }
}

/// Recompute `target`'s factors from `source`'s through steps 1–4.
fn update_side(param: &Parameter, target: &mut Side, source: &Side) -> Result<(), AlsError> {
    let step1 = Step1Local::new(param.clone());
    let cross_products = map_nodes(&source.step1, |_, input| {
        step1.compute(input)?.into_cross_product()
    })?;

    let mut master_input = Step2MasterInput::new();
    for cp in cross_products {
        master_input.add(cp);
    }
    let cross_product = Step2Master::new(param.clone())
        .compute(&master_input)?
        .into_cross_product()?;

    let step3 = Step3Local::new(param.clone());
    let outgoing = map_nodes(&source.step3, |_, input| {
        step3.compute(input)?.into_output_for_step4()
    })?;

    let n_targets = target.step4.len();
    let mut inboxes: Vec<KeyValueCollection<PartialModel>> =
        (0..n_targets).map(|_| KeyValueCollection::new()).collect();
    for (j, out) in outgoing.into_iter().enumerate() {
        for (k, pm) in out {
            let inbox = inboxes.get_mut(k).ok_or_else(|| {
                AlsError::IncorrectIndex(format!(
                    "node {} addressed a partial model to node {} of {}",
                    j, k, n_targets
                ))
            })?;
            inbox.insert(j, pm);
        }
    }
    for (input, inbox) in target.step4.iter_mut().zip(inboxes) {
        input.set_partial_models(inbox);
        input.set_cross_product(cross_product.clone());
    }

    let step4 = Step4Local::new(param.clone());
    let models = map_nodes(&target.step4, |_, input| {
        step4.compute(input)?.into_partial_model()
    })?;
    target.set_models(models);
    Ok(())
}
