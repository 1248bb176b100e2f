//! End-to-end checks of the distributed protocol against batch training.
//!
//! The first test drives every step by hand, the way a worker program would
//! call them; the rest go through `Driver`.

use approx::assert_abs_diff_eq;
use implicit_als_rs::distributed::{
    DistributedStep, Step1Local, Step1LocalInput, Step2Master, Step2MasterInput, Step3Local,
    Step3LocalInput, Step4Local, Step4LocalInput,
};
use implicit_als_rs::driver::Driver;
use implicit_als_rs::init::{InitStep1Local, InitStep1LocalInput, InitStep2Local, InitStep2LocalInput};
use implicit_als_rs::io::load_csr;
use implicit_als_rs::predict::{predict_ratings, PredictStep1Local, PredictStep1LocalInput};
use implicit_als_rs::train::train;
use implicit_als_rs::{
    CsrTable, DenseTable, KeyValueCollection, Model, Parameter, PartialModel, Partition,
    TrainingData,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

fn load_fixture() -> CsrTable {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../data/ratings_csr.csv");
    load_csr(Path::new(path), None).expect("failed to load ratings fixture")
}

fn random_ratings(n_users: usize, n_items: usize, density: f64, seed: u64) -> CsrTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    for u in 0..n_users {
        for i in 0..n_items {
            if rng.gen::<f64>() < density {
                triplets.push((u, i, rng.gen_range(1..=5) as f64));
            }
        }
    }
    CsrTable::from_triplets(n_users, n_items, &triplets).unwrap()
}

fn param() -> Parameter {
    Parameter {
        n_factors: 4,
        max_iterations: 3,
        alpha: 10.0,
        lambda: 0.05,
        seed: 2024,
        ..Default::default()
    }
}

fn assert_models_close(a: &Model, b: &Model) {
    assert_eq!((a.n_users(), a.n_items()), (b.n_users(), b.n_items()));
    for (x, y) in a.users_factors().data().iter().zip(b.users_factors().data()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-7);
    }
    for (x, y) in a.items_factors().data().iter().zip(b.items_factors().data()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-7);
    }
}

/// One user-or-item epoch across `n` nodes, every message routed by hand.
fn epoch(
    param: &Parameter,
    sources: &[PartialModel],
    source_routing: &[KeyValueCollection<Vec<usize>>],
    source_offsets: &[usize],
    target_data: &[CsrTable],
    target_offsets: &[usize],
) -> Vec<PartialModel> {
    let mut master = Step2MasterInput::new();
    for pm in sources {
        let cp = Step1Local::new(param.clone())
            .compute(&Step1LocalInput::new(pm.clone()))
            .unwrap()
            .into_cross_product()
            .unwrap();
        master.add(cp);
    }
    let yty = Step2Master::new(param.clone())
        .compute(&master)
        .unwrap()
        .into_cross_product()
        .unwrap();

    let mut inboxes: Vec<KeyValueCollection<PartialModel>> =
        target_data.iter().map(|_| KeyValueCollection::new()).collect();
    for (j, pm) in sources.iter().enumerate() {
        let out = Step3Local::new(param.clone())
            .compute(&Step3LocalInput::new(
                pm.clone(),
                source_routing[j].clone(),
                source_offsets[j],
            ))
            .unwrap()
            .into_output_for_step4()
            .unwrap();
        for (k, block) in out {
            inboxes[k].insert(j, block);
        }
    }

    inboxes
        .into_iter()
        .enumerate()
        .map(|(k, inbox)| {
            Step4Local::new(param.clone())
                .compute(&Step4LocalInput::new(
                    inbox,
                    target_data[k].clone(),
                    yty.clone(),
                    target_offsets[k],
                ))
                .unwrap()
                .into_partial_model()
                .unwrap()
        })
        .collect()
}

fn stack(blocks: &[PartialModel], k: usize) -> DenseTable {
    let n: usize = blocks.iter().map(|b| b.n_rows()).sum();
    let data = blocks.iter().flat_map(|b| b.factors().data().to_vec()).collect();
    DenseTable::from_vec(n, k, data).unwrap()
}

#[test]
fn hand_driven_protocol_matches_batch() {
    implicit_als_rs::set_quiet(true);
    let ratings = load_fixture();
    let p = param();
    let n_nodes = 3;
    let user_offsets = Partition::Equal(n_nodes).offsets(ratings.n_rows()).unwrap();
    let item_offsets = Partition::Equal(n_nodes).offsets(ratings.n_cols()).unwrap();
    let by_item = ratings.transpose();

    // init step 1 on every item node
    let mut items = Vec::new();
    let mut item_routing = Vec::new();
    let mut item_data = Vec::new();
    let mut inboxes: Vec<KeyValueCollection<CsrTable>> =
        (0..n_nodes).map(|_| KeyValueCollection::new()).collect();
    for j in 0..n_nodes {
        let block = by_item.row_block(item_offsets[j], item_offsets[j + 1]);
        let (pm, blocks, routing, offsets) =
            InitStep1Local::new(p.clone(), ratings.n_rows(), Partition::Equal(n_nodes))
                .compute(&InitStep1LocalInput::new(block.clone(), item_offsets[j]))
                .unwrap()
                .into_parts()
                .unwrap();
        assert_eq!(offsets, user_offsets);
        for (k, b) in blocks {
            inboxes[k].insert(j, b);
        }
        items.push(pm);
        item_routing.push(routing);
        item_data.push(block);
    }

    // init step 2 on every user node
    let mut user_data = Vec::new();
    let mut user_routing = Vec::new();
    for (k, inbox) in inboxes.into_iter().enumerate() {
        let (data, routing) = InitStep2Local::new(p.clone())
            .compute(&InitStep2LocalInput::new(inbox, item_offsets.clone()))
            .unwrap()
            .into_parts()
            .unwrap();
        assert_eq!(data, ratings.row_block(user_offsets[k], user_offsets[k + 1]));
        user_data.push(data);
        user_routing.push(routing);
    }

    let mut users: Vec<PartialModel> = (0..n_nodes)
        .map(|k| {
            PartialModel::zeros(
                user_offsets[k + 1] - user_offsets[k],
                p.n_factors,
                user_offsets[k],
            )
        })
        .collect();
    for _ in 0..p.max_iterations {
        users = epoch(&p, &items, &item_routing, &item_offsets, &user_data, &user_offsets);
        items = epoch(&p, &users, &user_routing, &user_offsets, &item_data, &item_offsets);
    }

    let distributed =
        Model::new(stack(&users, p.n_factors), stack(&items, p.n_factors)).unwrap();
    let batch = train(TrainingData::Csr(&ratings), &p).unwrap();
    assert_models_close(&batch, &distributed);
}

#[test]
fn driver_matches_batch_for_several_node_counts() {
    implicit_als_rs::set_quiet(true);
    let ratings = random_ratings(23, 17, 0.2, 5);
    let p = param();
    let batch = train(TrainingData::Csr(&ratings), &p).unwrap();
    for n_nodes in [1, 2, 3, 5, 8] {
        let distributed = Driver::new(p.clone(), n_nodes).train(&ratings).unwrap();
        assert_models_close(&batch, &distributed);
    }
}

#[test]
fn driver_handles_users_and_items_without_ratings() {
    implicit_als_rs::set_quiet(true);
    // user 3 and item 4 have no ratings at all
    let ratings = CsrTable::from_triplets(
        5,
        6,
        &[(0, 0, 1.0), (1, 1, 2.0), (2, 2, 3.0), (4, 3, 1.0), (4, 5, 4.0)],
    )
    .unwrap();
    let p = param();
    let model = Driver::new(p.clone(), 2).train(&ratings).unwrap();
    assert!(model.user(3).iter().all(|&v| v == 0.0));
    assert!(model.item(4).iter().all(|&v| v == 0.0));
    assert_models_close(&train(TrainingData::Csr(&ratings), &p).unwrap(), &model);
}

#[test]
fn prediction_tiles_cover_full_rating_matrix() {
    implicit_als_rs::set_quiet(true);
    let ratings = load_fixture();
    let p = param();
    let model = train(TrainingData::Csr(&ratings), &p).unwrap();
    let full = predict_ratings(&model);

    let user_offsets = Partition::Equal(2).offsets(model.n_users()).unwrap();
    let item_offsets = Partition::Equal(3).offsets(model.n_items()).unwrap();
    let block = |t: &DenseTable, lo: usize, hi: usize| {
        let rows: Vec<Vec<f64>> = (lo..hi).map(|r| t.row(r).to_vec()).collect();
        PartialModel::from_offset(
            DenseTable::from_vec(hi - lo, t.n_cols(), rows.concat()).unwrap(),
            lo,
        )
    };

    for u in user_offsets.windows(2) {
        for i in item_offsets.windows(2) {
            let tile = PredictStep1Local::new(p.clone())
                .compute(&PredictStep1LocalInput::new(
                    block(model.users_factors(), u[0], u[1]),
                    block(model.items_factors(), i[0], i[1]),
                ))
                .unwrap();
            let r = tile.ratings().unwrap();
            for (a, &gu) in tile.user_indices().iter().enumerate() {
                for (b, &gi) in tile.item_indices().iter().enumerate() {
                    assert_abs_diff_eq!(r.get(a, b), full.get(gu, gi), epsilon = 1e-12);
                }
            }
        }
    }
}
