// ordering-core/src/shuffle/s1n.rs

use rand::seq::SliceRandom;

use super::spans::shuffle_shards;

/// Shuffles each canonical node's whole share as one block.
pub(super) fn shuffle(subshard_sizes: &[u64], num_nodes: u64, seed: u64, epoch: u64) -> Vec<i64> {
    let (layout, mut epoch_rng) = shuffle_shards(subshard_sizes, num_nodes, seed, epoch);
    let mut ids = layout.lay_out();
    for node in 0..layout.num_nodes() {
        ids[layout.node_range(node)].shuffle(&mut epoch_rng);
    }
    ids
}
