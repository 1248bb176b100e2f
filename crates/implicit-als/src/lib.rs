//! # implicit-als-rs
//!
//! Implicit-feedback Alternating Least Squares for collaborative filtering,
//! with the four-step bulk-synchronous distributed training protocol:
//!
//! 1. **Step 1 (local)**: every node computes `FᵀF` for its factor block.
//! 2. **Step 2 (master)**: the coordinator sums the cross-products.
//! 3. **Step 3 (local)**: every node splits its factor rows into partial
//!    models addressed to the nodes that need them.
//! 4. **Step 4 (local)**: every node gathers the partial models sent to it
//!    and recomputes the factors of its block of the other side.
//!
//! Batch training ([`train::train`]) and the in-process distributed driver
//! ([`driver::Driver`]) produce the same model for the same parameters.
//!
//! ## Feature Flags
//!
//! - `rayon` — Run local steps of all nodes in parallel inside the driver,
//!   and parallelise per-row factor solves (off by default).

use std::sync::atomic::{AtomicBool, Ordering};

pub mod collection;
pub mod distributed;
pub mod driver;
pub mod error;
pub mod init;
pub mod io;
pub mod kernel;
pub mod metrics;
pub mod predict;
pub mod solver;
pub mod table;
pub mod train;
pub mod types;
pub mod util;

pub use collection::KeyValueCollection;
pub use error::AlsError;
pub use table::{CsrTable, DenseTable, IndexTable, StorageLayout};
pub use types::*;

static QUIET: AtomicBool = AtomicBool::new(false);

/// Silence (or re-enable) progress output emitted during training.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

pub(crate) fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Emit a progress message unless quiet mode is on.
pub(crate) fn info(msg: &str) {
    if !is_quiet() {
        tracing::info!("{}", msg);
    }
}
