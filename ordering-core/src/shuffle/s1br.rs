// ordering-core/src/shuffle/s1br.rs

//! Randomly sized block shuffling.
//!
//! Block boundaries and one seed per block are drawn sequentially from the
//! epoch RNG, so the result does not depend on how blocks are scheduled. The
//! blocks are disjoint slices of the output and are shuffled on the rayon
//! pool.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::spans::shuffle_shards;

pub(super) fn shuffle(
    subshard_sizes: &[u64],
    num_nodes: u64,
    seed: u64,
    epoch: u64,
    min_block_size: u64,
    max_block_size: u64,
) -> Vec<i64> {
    let (layout, mut epoch_rng) = shuffle_shards(subshard_sizes, num_nodes, seed, epoch);
    let mut ids = layout.lay_out();
    let min_block_size = min_block_size.max(1);
    let max_block_size = max_block_size.max(min_block_size);

    let mut blocks: Vec<(&mut [i64], u64)> = Vec::new();
    let mut rest: &mut [i64] = &mut ids;
    for node in 0..layout.num_nodes() {
        let node_len = layout.node_range(node).len();
        let (mut node_ids, tail) = std::mem::take(&mut rest).split_at_mut(node_len);
        rest = tail;

        while !node_ids.is_empty() {
            let size = epoch_rng.gen_range(min_block_size..=max_block_size) as usize;
            let size = size.min(node_ids.len());
            let (block, tail) = std::mem::take(&mut node_ids).split_at_mut(size);
            blocks.push((block, epoch_rng.gen()));
            node_ids = tail;
        }
    }

    blocks.into_par_iter().for_each(|(block, block_seed)| {
        block.shuffle(&mut ChaCha8Rng::seed_from_u64(block_seed));
    });

    ids
}
