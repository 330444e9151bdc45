// ordering-core/src/shuffle/s1s.rs

use rand::seq::SliceRandom;

use super::spans::shuffle_shards;

/// Shuffles within each span only.
pub(super) fn shuffle(subshard_sizes: &[u64], num_nodes: u64, seed: u64, epoch: u64) -> Vec<i64> {
    let (layout, mut epoch_rng) = shuffle_shards(subshard_sizes, num_nodes, seed, epoch);
    let mut ids = layout.lay_out();
    let mut offset = 0usize;
    for span in &layout.spans {
        let len = span.len() as usize;
        ids[offset..offset + len].shuffle(&mut epoch_rng);
        offset += len;
    }
    ids
}
