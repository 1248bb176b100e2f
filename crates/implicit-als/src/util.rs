//! Shared internal utilities for implicit-als-rs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Largest index accepted when parsing rating files.
pub const MAX_INDEX: usize = 100_000_000;

/// Random stream for the initial factors of one global row.
///
/// Each row gets its own stream so that batch and distributed
/// initialisation produce identical factors regardless of partitioning.
pub(crate) fn row_rng(seed: u64, row: usize) -> StdRng {
    let mixed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407)
        ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(mixed)
}

/// Fill an initial factor row: factor 0 is `mean`, the rest are uniform in
/// `[0, 1)`.
pub(crate) fn init_factor_row(seed: u64, row: usize, mean: f64, out: &mut [f64]) {
    let mut rng = row_rng(seed, row);
    if let Some((first, rest)) = out.split_first_mut() {
        *first = mean;
        for v in rest {
            *v = rng.gen::<f64>();
        }
    }
}

/// Parse a 1-based index and convert it to 0-based.
pub fn parse_one_based_index(idx_str: &str, max_index: usize) -> Result<usize, String> {
    let index = idx_str
        .parse::<usize>()
        .map_err(|_| format!("invalid index: {}", idx_str))?;

    if !(1..=max_index).contains(&index) {
        Err(format!("index {} outside 1..={}", index, max_index))
    } else {
        Ok(index - 1)
    }
}

/// Dot product of two equally long slices.
#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
