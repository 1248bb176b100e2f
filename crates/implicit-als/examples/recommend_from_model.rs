//! Train, persist, reload and print top-3 recommendations per user.
//!
//! Run:
//!   cargo run -p implicit-als-rs --example recommend_from_model

use implicit_als_rs::io::{load_csr, load_model, save_model};
use implicit_als_rs::predict::recommend;
use implicit_als_rs::train::train;
use implicit_als_rs::{set_quiet, Parameter, TrainingData};
use std::path::Path;

fn main() {
    set_quiet(true);

    let ratings = load_csr(Path::new("data/ratings_csr.csv"), None).expect("failed to load ratings");
    let model_path = Path::new("data/ratings.persisted.model");

    let model = train(TrainingData::Csr(&ratings), &Parameter::default()).expect("training failed");
    save_model(model_path, &model).expect("failed to save model");
    let loaded = load_model(model_path).expect("failed to load model");

    for user in 0..loaded.n_users() {
        let recs = recommend(&loaded, user, 3, Some(&ratings)).expect("user out of range");
        let shown: Vec<String> = recs.iter().map(|(i, s)| format!("{}:{:.3}", i, s)).collect();
        println!("user {}: {}", user, shown.join(" "));
    }
    println!("Model persisted at: {}", model_path.display());
}
