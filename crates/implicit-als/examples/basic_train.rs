//! Basic end-to-end training example (train + evaluate + save).

use implicit_als_rs::io::{load_csr, save_model};
use implicit_als_rs::metrics::rmse_observed;
use implicit_als_rs::train::train;
use implicit_als_rs::{set_quiet, Parameter, TrainingData};
use std::path::Path;

fn main() {
    set_quiet(true);

    let ratings = load_csr(Path::new("data/ratings_csr.csv"), None).expect("failed to load ratings");

    let param = Parameter {
        n_factors: 2,
        max_iterations: 10,
        ..Default::default()
    };

    let model = train(TrainingData::Csr(&ratings), &param).expect("training failed");
    let rmse = rmse_observed(&ratings, &model, &param).expect("shape mismatch");
    save_model(Path::new("ratings.model"), &model).expect("failed to save model");

    println!("Preference RMSE on observed ratings: {:.4}", rmse);
}
