// ordering-core/src/shuffle/s1b.rs

use rand::seq::SliceRandom;

use super::spans::shuffle_shards;

/// Shuffles fixed-size blocks within each canonical node's share.
///
/// Blocks start at each node's first position, so a node's last block may
/// be short.
pub(super) fn shuffle(
    subshard_sizes: &[u64],
    num_nodes: u64,
    seed: u64,
    epoch: u64,
    block_size: u64,
) -> Vec<i64> {
    let (layout, mut epoch_rng) = shuffle_shards(subshard_sizes, num_nodes, seed, epoch);
    let mut ids = layout.lay_out();
    let block_size = block_size.max(1) as usize;
    for node in 0..layout.num_nodes() {
        for block in ids[layout.node_range(node)].chunks_mut(block_size) {
            block.shuffle(&mut epoch_rng);
        }
    }
    ids
}
