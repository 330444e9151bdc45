// ordering-core/src/sampler.rs

//! Per-epoch weighted resampling.
//!
//! The sampler turns every stream's resolved `choose` into an exact number of
//! samples per shard, then expands those counts into subshards and a dense
//! virtual-to-physical ID mapping. Full repeats of a shard emit the shard's
//! IDs in order; the partial remainder draws without replacement.

use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::{SamplerConfig, SamplingStrategy};
use crate::error::{OrderError, Result};
use crate::stream::{Shard, Stream};

/// Available sampling algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerAlgo {
    /// Scale shard counts with random rounding, then reconcile exactly.
    M2,
}

impl SamplerAlgo {
    pub fn name(&self) -> &'static str {
        match self {
            Self::M2 => "m2",
        }
    }
}

impl FromStr for SamplerAlgo {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "m2" => Ok(Self::M2),
            _ => Err(OrderError::config(format!(
                "unknown sampler algorithm: '{s}' (must be 'm2')"
            ))),
        }
    }
}

/// One epoch's resampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sampling {
    /// Size of every produced subshard, in shard order.
    pub subshard_sizes: Vec<u64>,
    /// Physical sample ID of each virtual sample ID.
    pub fake_to_real: Vec<i64>,
}

impl Sampling {
    pub fn epoch_size(&self) -> u64 {
        self.fake_to_real.len() as u64
    }
}

/// Resamples streams into an epoch's virtual sample space.
#[derive(Debug, Clone)]
pub struct Sampler {
    algo: SamplerAlgo,
    seed: u64,
    strategy: SamplingStrategy,
}

impl Sampler {
    pub fn new(algo: SamplerAlgo, seed: u64, strategy: SamplingStrategy) -> Self {
        Self {
            algo,
            seed,
            strategy,
        }
    }

    pub fn from_config(config: &SamplerConfig) -> Result<Self> {
        Ok(Self::new(
            config.algo.parse()?,
            config.seed,
            config.strategy,
        ))
    }

    pub fn algo(&self) -> SamplerAlgo {
        self.algo
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed used for a given epoch.
    pub fn epoch_seed(&self, epoch: u64) -> u64 {
        match self.strategy {
            SamplingStrategy::Balanced => self.seed.wrapping_add(epoch),
            SamplingStrategy::Fixed => self.seed,
        }
    }

    /// Draws this epoch's samples.
    ///
    /// Streams must have their shard layout and resolved weights set.
    ///
    /// # Errors
    ///
    /// Returns an error if a stream's shard range falls outside `shards` or a
    /// stream is asked to choose from no samples.
    pub fn sample(&self, streams: &[Stream], shards: &[Shard], epoch: u64) -> Result<Sampling> {
        match self.algo {
            SamplerAlgo::M2 => sample_m2(streams, shards, self.epoch_seed(epoch)),
        }
    }
}

fn sample_m2(streams: &[Stream], shards: &[Shard], seed: u64) -> Result<Sampling> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let epoch_size: u64 = streams.iter().map(Stream::choose).sum();
    let mut sampling = Sampling {
        subshard_sizes: Vec::new(),
        fake_to_real: Vec::with_capacity(epoch_size as usize),
    };

    for stream in streams {
        let stream_shards = shards.get(stream.shard_range()).ok_or_else(|| {
            OrderError::stream(
                stream.name(),
                format!(
                    "shard range {:?} is outside the {} known shards",
                    stream.shard_range(),
                    shards.len()
                ),
            )
        })?;
        if stream.choose() > 0 && stream.num_samples() == 0 {
            return Err(OrderError::stream(
                stream.name(),
                "cannot choose samples from an empty stream",
            ));
        }

        let sizes: Vec<u64> = stream_shards.iter().map(|s| s.num_samples).collect();
        let chooses = if stream.choose() == stream.num_samples() {
            sizes.clone()
        } else {
            let scale = stream.choose() as f64 / stream.num_samples() as f64;
            let mut chooses: Vec<u64> = sizes
                .iter()
                .map(|&size| {
                    let exact = size as f64 * scale;
                    let floor = exact.floor();
                    if rng.gen::<f64>() < exact - floor {
                        floor as u64 + 1
                    } else {
                        floor as u64
                    }
                })
                .collect();
            fix_shortfall(stream.choose(), &mut rng, &mut chooses, &sizes);
            chooses
        };

        for (shard, choose) in stream_shards.iter().zip(chooses) {
            emit_shard(shard, choose, &mut rng, &mut sampling);
        }

        debug!(
            stream = stream.name(),
            shards = stream_shards.len(),
            choose = stream.choose(),
            "Sampled stream"
        );
    }

    Ok(sampling)
}

/// Nudges `values` until they sum to `target`.
///
/// Shards are visited in a random order. Increments skip empty shards and
/// decrements never take a value below zero; each pass touches a shard at
/// most once.
fn fix_shortfall(target: u64, rng: &mut ChaCha8Rng, values: &mut [u64], sizes: &[u64]) {
    let mut sum: u64 = values.iter().sum();
    if sum == target {
        return;
    }

    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.shuffle(rng);

    if sum < target {
        indices.retain(|&i| sizes[i] > 0);
        if indices.is_empty() {
            return;
        }
        'grow: loop {
            for &i in &indices {
                if sum == target {
                    break 'grow;
                }
                values[i] += 1;
                sum += 1;
            }
        }
    } else {
        'shrink: loop {
            for &i in &indices {
                if sum == target {
                    break 'shrink;
                }
                if values[i] > 0 {
                    values[i] -= 1;
                    sum -= 1;
                }
            }
        }
    }
}

/// Appends one shard's subshards and virtual IDs.
fn emit_shard(shard: &Shard, choose: u64, rng: &mut ChaCha8Rng, sampling: &mut Sampling) {
    if shard.num_samples == 0 || choose == 0 {
        return;
    }

    let offset = shard.sample_offset as i64;
    let num_full_repeats = choose / shard.num_samples;
    let remainder = choose % shard.num_samples;

    for _ in 0..num_full_repeats {
        sampling.subshard_sizes.push(shard.num_samples);
        sampling
            .fake_to_real
            .extend((0..shard.num_samples as i64).map(|i| offset + i));
    }

    if remainder > 0 {
        let mut indices: Vec<i64> = (0..shard.num_samples as i64).collect();
        let (chosen, _) = indices.partial_shuffle(rng, remainder as usize);
        chosen.sort_unstable();
        sampling.subshard_sizes.push(remainder);
        sampling
            .fake_to_real
            .extend(chosen.iter().map(|&i| offset + i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{derive_sampling, situate_shards};
    use std::collections::HashMap;

    fn build(
        streams: Vec<Stream>,
        shard_lists: Vec<Vec<u64>>,
        epoch_size: Option<u64>,
    ) -> (Vec<Stream>, Vec<Shard>) {
        let mut streams = streams;
        let shards = situate_shards(&mut streams, shard_lists);
        let relative = streams[0].configured_proportion().is_some();
        derive_sampling(&mut streams, relative, 1337, epoch_size).unwrap();
        (streams, shards)
    }

    fn sampler() -> Sampler {
        Sampler::new(SamplerAlgo::M2, 1337, SamplingStrategy::Balanced)
    }

    #[test]
    fn test_algo_from_str() {
        assert_eq!("m2".parse::<SamplerAlgo>().unwrap(), SamplerAlgo::M2);
        assert_eq!(SamplerAlgo::M2.name(), "m2");
        let err = "m1".parse::<SamplerAlgo>().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_one_to_one_is_identity() {
        let (streams, shards) = build(
            vec![Stream::in_memory("a"), Stream::in_memory("b")],
            vec![vec![3, 5], vec![4]],
            None,
        );
        let sampling = sampler().sample(&streams, &shards, 0).unwrap();
        assert_eq!(sampling.subshard_sizes, vec![3, 5, 4]);
        assert_eq!(sampling.fake_to_real, (0..12).collect::<Vec<i64>>());
    }

    #[test]
    fn test_per_stream_sums_are_exact() {
        let (streams, shards) = build(
            vec![
                Stream::in_memory("a").with_proportion(0.3),
                Stream::in_memory("b").with_proportion(0.7),
            ],
            vec![vec![17, 3, 29, 11], vec![101, 7, 64]],
            Some(1234),
        );

        for epoch in 0..5 {
            let sampling = sampler().sample(&streams, &shards, epoch).unwrap();
            assert_eq!(sampling.epoch_size(), 1234);
            assert_eq!(sampling.subshard_sizes.iter().sum::<u64>(), 1234);

            for stream in &streams {
                let range = stream.sample_offset() as i64
                    ..(stream.sample_offset() + stream.num_samples()) as i64;
                let drawn = sampling
                    .fake_to_real
                    .iter()
                    .filter(|id| range.contains(id))
                    .count() as u64;
                assert_eq!(drawn, stream.choose(), "stream {}", stream.name());
            }
        }
    }

    #[test]
    fn test_repeats_cover_shard_evenly() {
        let (streams, shards) = build(
            vec![Stream::in_memory("a").with_repeat(2.5)],
            vec![vec![4, 7, 3, 9]],
            None,
        );
        let sampling = sampler().sample(&streams, &shards, 3).unwrap();
        assert_eq!(sampling.epoch_size(), streams[0].choose());

        for shard in &shards {
            let range = shard.sample_range();
            let mut counts: HashMap<i64, u64> = HashMap::new();
            for &id in &sampling.fake_to_real {
                if range.contains(&(id as u64)) {
                    *counts.entry(id).or_default() += 1;
                }
            }
            let drawn: u64 = counts.values().sum();
            let full = drawn / shard.num_samples;
            let extra = drawn % shard.num_samples;

            // Every sample is seen `full` times; `extra` of them once more.
            let mut seen_extra = 0;
            for id in range.clone() {
                let count = counts.get(&(id as i64)).copied().unwrap_or(0);
                assert!(count == full || count == full + 1);
                if count == full + 1 {
                    seen_extra += 1;
                }
            }
            assert_eq!(seen_extra, extra);
        }
    }

    #[test]
    fn test_subshards_are_ascending_blocks() {
        let (streams, shards) = build(
            vec![Stream::in_memory("a").with_choose(25)],
            vec![vec![10]],
            None,
        );
        let sampling = sampler().sample(&streams, &shards, 0).unwrap();
        assert_eq!(sampling.subshard_sizes, vec![10, 10, 5]);

        let ids = &sampling.fake_to_real;
        assert_eq!(&ids[..10], &(0..10).collect::<Vec<i64>>()[..]);
        assert_eq!(&ids[10..20], &(0..10).collect::<Vec<i64>>()[..]);
        assert!(ids[20..].windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_downsampling_stays_in_bounds() {
        let (streams, shards) = build(
            vec![Stream::in_memory("a").with_choose(50), Stream::in_memory("b")],
            vec![vec![40, 40, 40], vec![5]],
            None,
        );
        let sampling = sampler().sample(&streams, &shards, 1).unwrap();
        assert_eq!(sampling.epoch_size(), 55);
        assert!(sampling.subshard_sizes.iter().all(|&s| s > 0));
        for &id in &sampling.fake_to_real[..50] {
            assert!((0..120).contains(&id));
        }
        assert_eq!(&sampling.fake_to_real[50..], &[120, 121, 122, 123, 124]);
    }

    #[test]
    fn test_strategy_controls_reseeding() {
        let (streams, shards) = build(
            vec![Stream::in_memory("a").with_choose(30)],
            vec![vec![20, 20, 20]],
            None,
        );

        let balanced = sampler();
        let a = balanced.sample(&streams, &shards, 0).unwrap();
        let b = balanced.sample(&streams, &shards, 0).unwrap();
        let c = balanced.sample(&streams, &shards, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let fixed = Sampler::new(SamplerAlgo::M2, 1337, SamplingStrategy::Fixed);
        let a = fixed.sample(&streams, &shards, 0).unwrap();
        let c = fixed.sample(&streams, &shards, 1).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_fix_shortfall() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let mut values = vec![1, 0, 2];
        fix_shortfall(7, &mut rng, &mut values, &[5, 0, 5]);
        assert_eq!(values.iter().sum::<u64>(), 7);
        assert_eq!(values[1], 0);

        let mut values = vec![1, 0, 4];
        fix_shortfall(2, &mut rng, &mut values, &[5, 5, 5]);
        assert_eq!(values.iter().sum::<u64>(), 2);
        assert_eq!(values[1], 0);
    }

    #[test]
    fn test_bad_shard_range() {
        let (streams, shards) = build(vec![Stream::in_memory("a")], vec![vec![3, 4]], None);
        let err = sampler().sample(&streams, &shards[..1], 0).unwrap_err();
        assert!(matches!(err, OrderError::Stream { .. }));
    }
}
