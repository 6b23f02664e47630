// src/shuffle.rs

//! Deterministic seeded permutations.
//!
//! Every shuffle in the loader reseeds a fresh generator from an explicitly
//! derived integer. No generator state survives across operations or crosses
//! the boundary between the consumer path and the staging task, which makes
//! each permutation a pure function of its inputs: replaying from a saved
//! cursor regenerates bit-identical order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::source::ChunkId;

/// Folds a list of integers into a single seed with splitmix64 steps.
pub fn derive_seed(parts: &[u64]) -> u64 {
    let mut acc: u64 = 0;
    for &part in parts {
        acc = splitmix64(acc ^ part);
    }
    acc
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for the chunk order of one sweep.
pub fn chunk_order_seed(sweep_index: u64, seed_offset: u64) -> u64 {
    derive_seed(&[seed_offset, sweep_index])
}

/// Seed for the sequence order of one sweep segment inside a window.
///
/// Keyed on where the window starts so the exact in-window order can be
/// regenerated from a restored cursor position alone.
pub fn sequence_order_seed(
    window_start: u64,
    sweep_index: u64,
    segment_index: u64,
    seed_offset: u64,
) -> u64 {
    derive_seed(&[seed_offset, window_start, sweep_index, segment_index])
}

/// Fisher-Yates shuffle over a generator seeded from `seed`.
pub fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
}

/// The permuted chunk visit order for one sweep.
pub fn sweep_chunk_order(chunk_count: u32, sweep_index: u64, seed_offset: u64) -> Vec<ChunkId> {
    let mut order: Vec<ChunkId> = (0..chunk_count).collect();
    shuffle(&mut order, chunk_order_seed(sweep_index, seed_offset));
    order
}
