//! Train with the in-process distributed driver and compare to batch.
//!
//! Run:
//!   cargo run -p implicit-als-rs --example distributed_train

use implicit_als_rs::driver::Driver;
use implicit_als_rs::io::load_triplets;
use implicit_als_rs::train::train;
use implicit_als_rs::{set_quiet, Parameter, TrainingData};
use std::path::Path;

fn main() {
    set_quiet(true);

    let ratings = load_triplets(Path::new("data/ratings.txt")).expect("failed to load ratings");
    let param = Parameter {
        n_factors: 3,
        ..Default::default()
    };

    let batch = train(TrainingData::Csr(&ratings), &param).expect("batch training failed");
    let distributed = Driver::new(param, 3)
        .train(&ratings)
        .expect("distributed training failed");

    let max_diff = batch
        .users_factors()
        .data()
        .iter()
        .chain(batch.items_factors().data())
        .zip(
            distributed
                .users_factors()
                .data()
                .iter()
                .chain(distributed.items_factors().data()),
        )
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);

    println!("Nodes:                 3");
    println!("Max factor difference: {:e}", max_diff);
}
