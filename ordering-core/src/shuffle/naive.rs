// ordering-core/src/shuffle/naive.rs

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Shuffles the whole virtual ID range as one block, ignoring nodes and shards.
pub(super) fn shuffle(subshard_sizes: &[u64], seed: u64, epoch: u64) -> Vec<i64> {
    let total: u64 = subshard_sizes.iter().sum();
    let mut ids: Vec<i64> = (0..total as i64).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch));
    ids.shuffle(&mut rng);
    ids
}
