// ordering-core/src/dataset.rs

//! Dataset orchestration.
//!
//! A [`Dataset`] is built once from an [`OrderConfig`]: streams are resolved,
//! their shard catalogs are loaded in parallel, shards are laid out over one
//! physical sample space, and stream weights are turned into an exact epoch
//! size. After that the dataset is read-only and every call to
//! [`Dataset::iter`] computes one epoch's ordering from scratch:
//!
//! 1. sample and determine, concurrently, on two scoped threads
//! 2. shuffle the virtual IDs within canonical nodes, if enabled
//! 3. map virtual IDs to physical sample IDs
//!
//! # Example
//!
//! ```no_run
//! use ordering_core::{Dataset, OrderConfig, PhysicalTopology};
//!
//! let config = OrderConfig::from_file("order.toml").unwrap().with_env_overrides();
//! let dataset = Dataset::from_config(config).unwrap();
//!
//! // Two nodes with eight ranks and four dataloader workers each.
//! let physical = PhysicalTopology::new(2, 8, 4);
//! let ids = dataset.iter(0, &physical, 0).unwrap();
//! for &sample_id in ids.worker_ids(0, 0, 0) {
//!     // Fetch and decode `sample_id`.
//! }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::OrderConfig;
use crate::determiner::{Determiner, PhysicalTopology};
use crate::error::{OrderError, Result};
use crate::sampler::{Sampler, Sampling};
use crate::shuffle::Shuffler;
use crate::spanner::SpanIndex;
use crate::stream::{
    cross_check_weights, derive_sampling, load_shards, situate_shards, IndexFileSource, Shard,
    ShardSource, Stream,
};
use crate::tensor::SampleTensor;

/// Shared flag for abandoning an in-flight iteration.
///
/// Clones share the same flag. A cancelled token stays cancelled until
/// [`CancellationToken::reset`] is called.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(OrderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Wall time spent in each stage of one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub sample: Duration,
    pub determine: Duration,
    /// Zero when shuffling is disabled.
    pub shuffle: Duration,
    pub map: Duration,
    pub total: Duration,
}

/// A weighted, sharded, multi-stream dataset and its ordering pipeline.
#[derive(Debug)]
pub struct Dataset {
    config: OrderConfig,
    streams: Vec<Stream>,
    shards: Vec<Shard>,
    shard_index: SpanIndex,
    epoch_size: u64,
    sampler: Sampler,
    determiner: Determiner,
    shuffler: Shuffler,
    cancel: CancellationToken,
}

impl Dataset {
    /// Loads a dataset from a TOML configuration file.
    ///
    /// Environment variable overrides are applied after loading the file,
    /// and shard catalogs are read from each stream's index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unreadable or invalid, or if
    /// any stream's index cannot be loaded.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = OrderConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Loads a dataset, reading shard catalogs from each stream's index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any stream's
    /// index cannot be loaded.
    pub fn from_config(config: OrderConfig) -> Result<Self> {
        Self::with_source(config, &IndexFileSource)
    }

    /// Loads a dataset, reading shard catalogs from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, `source` fails for
    /// any stream, or the stream weights cannot be resolved.
    pub fn with_source(config: OrderConfig, source: &dyn ShardSource) -> Result<Self> {
        config.validate()?;

        let sampler = Sampler::from_config(&config.sampler)?;
        let determiner = Determiner::from_config(&config.determiner)?;
        let shuffler = Shuffler::from_config(&config.shuffler)?;

        let mut streams = config.build_streams()?;
        let relative = cross_check_weights(&streams)?;

        let shard_lists = load_shards(&streams, source)?;
        let shards = situate_shards(&mut streams, shard_lists);
        let shard_sizes: Vec<u64> = shards.iter().map(|s| s.num_samples).collect();
        let shard_index = SpanIndex::new(&shard_sizes, config.shard_index.bucket_size);

        let epoch_size = derive_sampling(
            &mut streams,
            relative,
            config.sampler.seed,
            config.sampler.epoch_size,
        )?;

        info!(
            streams = streams.len(),
            shards = shards.len(),
            samples = shard_index.num_items(),
            epoch_size,
            relative,
            shuffle = config.shuffle,
            shuffler = shuffler.name(),
            "Dataset initialized"
        );

        Ok(Self {
            config,
            streams,
            shards,
            shard_index,
            epoch_size,
            sampler,
            determiner,
            shuffler,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Number of underlying physical samples over all streams.
    pub fn num_samples(&self) -> u64 {
        self.shard_index.num_items()
    }

    /// Number of samples drawn per epoch.
    pub fn epoch_size(&self) -> u64 {
        self.epoch_size
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn determiner(&self) -> &Determiner {
        &self.determiner
    }

    pub fn shuffler(&self) -> &Shuffler {
        &self.shuffler
    }

    /// Token that cancels this dataset's iterations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Finds the shard holding a physical sample, and the sample's offset in it.
    ///
    /// # Errors
    ///
    /// Returns an error if `sample_id` is not a sample of this dataset.
    pub fn locate(&self, sample_id: u64) -> Result<(usize, u64)> {
        if sample_id >= self.shard_index.num_items() {
            return Err(OrderError::topology(format!(
                "sample {sample_id} is outside a dataset of {} samples",
                self.shard_index.num_items()
            )));
        }
        Ok(self.shard_index.find(sample_id))
    }

    /// Computes one epoch's tensor of physical sample IDs.
    ///
    /// The tensor is indexed by `(node, rank, worker, batch, position)`;
    /// padding slots hold [`crate::NO_SAMPLE`]. `sample_offset` resumes the
    /// epoch partway through and is rounded down to a multiple of the
    /// physical node count.
    ///
    /// # Errors
    ///
    /// Returns a topology error for an unusable `physical` layout or
    /// `sample_offset`, [`OrderError::Cancelled`] if the iteration was
    /// cancelled, or the error of whichever stage failed first.
    pub fn iter(
        &self,
        epoch: u64,
        physical: &PhysicalTopology,
        sample_offset: u64,
    ) -> Result<SampleTensor> {
        let (tensor, _) = self.bench(epoch, physical, sample_offset)?;
        Ok(tensor)
    }

    /// Like [`Dataset::iter`], but also reports how long each stage took.
    pub fn bench(
        &self,
        epoch: u64,
        physical: &PhysicalTopology,
        sample_offset: u64,
    ) -> Result<(SampleTensor, StageTimings)> {
        let started = Instant::now();
        let mut timings = StageTimings::default();

        // Sampling and determining share nothing, so they run side by side.
        // Both are joined before anything consumes their output.
        let ((sampling, sample_time), (mut tensor, determine_time)) =
            thread::scope(|scope| -> Result<_> {
                let sampler = scope.spawn(|| -> Result<(Sampling, Duration)> {
                    let start = Instant::now();
                    let sampling = self.sampler.sample(&self.streams, &self.shards, epoch)?;
                    Ok((sampling, start.elapsed()))
                });
                let determiner = scope.spawn(|| -> Result<(SampleTensor, Duration)> {
                    let start = Instant::now();
                    let tensor =
                        self.determiner
                            .determine(physical, self.epoch_size, sample_offset)?;
                    Ok((tensor, start.elapsed()))
                });

                let sampled = join_stage("sample", sampler);
                let determined = join_stage("determine", determiner);
                Ok((sampled?, determined?))
            })?;
        timings.sample = sample_time;
        timings.determine = determine_time;
        self.cancel.check()?;

        debug!(
            epoch,
            subshards = sampling.subshard_sizes.len(),
            shape = ?tensor.shape(),
            sample_ms = timings.sample.as_secs_f64() * 1e3,
            determine_ms = timings.determine.as_secs_f64() * 1e3,
            "Sampled and determined epoch"
        );

        if self.config.shuffle {
            let start = Instant::now();
            self.shuffle(&sampling, &mut tensor, epoch)?;
            timings.shuffle = start.elapsed();
            debug!(
                epoch,
                algo = self.shuffler.name(),
                shuffle_ms = timings.shuffle.as_secs_f64() * 1e3,
                "Shuffled epoch"
            );
            self.cancel.check()?;
        }

        let start = Instant::now();
        tensor.remap(&sampling.fake_to_real)?;
        timings.map = start.elapsed();
        timings.total = started.elapsed();

        debug!(
            epoch,
            samples = tensor.num_samples(),
            map_ms = timings.map.as_secs_f64() * 1e3,
            total_ms = timings.total.as_secs_f64() * 1e3,
            "Iteration ready"
        );

        Ok((tensor, timings))
    }

    fn shuffle(&self, sampling: &Sampling, tensor: &mut SampleTensor, epoch: u64) -> Result<()> {
        let ids = self.shuffler.shuffle(
            &sampling.subshard_sizes,
            self.determiner.canonical_nodes(),
            epoch,
        )?;
        tensor.remap(&ids)
    }
}

/// Joins a pipeline thread, turning a panic into a stage error.
fn join_stage<T>(
    stage: &'static str,
    handle: thread::ScopedJoinHandle<'_, Result<T>>,
) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(OrderError::stage(stage, "thread panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::tensor::NO_SAMPLE;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn in_memory(sizes: Vec<u64>) -> impl Fn(&Stream) -> Result<Vec<u64>> + Send + Sync {
        move |_: &Stream| Ok(sizes.clone())
    }

    fn single_stream_config() -> OrderConfig {
        let mut config = OrderConfig::default();
        config.stream.local = Some("memory".to_string());
        config
    }

    fn two_stream_config() -> OrderConfig {
        let mut config = OrderConfig::default();
        config.shuffle = true;
        config.determiner.canonical_nodes = 4;
        config.determiner.batch_size = 4;
        config.shuffler.min_block_size = 16;
        config.shuffler.max_block_size = 32;
        config.sampler.epoch_size = Some(600);
        for (name, proportion) in [("a", 0.25), ("b", 0.75)] {
            config.streams.insert(
                name.to_string(),
                StreamConfig {
                    local: Some(format!("/memory/{name}")),
                    proportion: Some(proportion),
                    ..Default::default()
                },
            );
        }
        config
    }

    #[test]
    fn test_init_lays_out_streams() {
        let dataset =
            Dataset::with_source(two_stream_config(), &in_memory(vec![40, 60, 100])).unwrap();
        assert_eq!(dataset.streams().len(), 2);
        assert_eq!(dataset.num_shards(), 6);
        assert_eq!(dataset.num_samples(), 400);
        assert_eq!(dataset.epoch_size(), 600);
        assert_eq!(dataset.streams()[0].choose(), 150);
        assert_eq!(dataset.streams()[1].choose(), 450);
        assert_eq!(dataset.shards()[3].sample_offset, 200);
    }

    #[test]
    fn test_init_propagates_source_errors() {
        let source = |stream: &Stream| -> Result<Vec<u64>> {
            Err(OrderError::stream(stream.name(), "index unavailable"))
        };
        let err = Dataset::with_source(two_stream_config(), &source).unwrap_err();
        assert!(matches!(err, OrderError::Stream { .. }));
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let mut config = single_stream_config();
        config.determiner.batch_size = 0;
        assert!(Dataset::with_source(config, &in_memory(vec![10])).is_err());
    }

    #[test]
    fn test_locate() {
        let dataset =
            Dataset::with_source(single_stream_config(), &in_memory(vec![1, 2, 3, 10, 4])).unwrap();
        assert_eq!(dataset.locate(0).unwrap(), (0, 0));
        assert_eq!(dataset.locate(15).unwrap(), (3, 9));
        assert_eq!(dataset.locate(16).unwrap(), (4, 0));
        assert!(dataset.locate(20).is_err());
    }

    #[test]
    fn test_unshuffled_single_stream_is_sequential() {
        let dataset =
            Dataset::with_source(single_stream_config(), &in_memory(vec![3, 4, 5])).unwrap();
        let tensor = dataset.iter(0, &PhysicalTopology::new(1, 1, 1), 0).unwrap();
        assert_eq!(tensor.as_slice(), &(0..12).collect::<Vec<i64>>()[..]);
    }

    #[test]
    fn test_iter_draws_each_stream_exactly() {
        let dataset =
            Dataset::with_source(two_stream_config(), &in_memory(vec![40, 60, 100])).unwrap();
        let physical = PhysicalTopology::new(2, 2, 2);
        let tensor = dataset.iter(3, &physical, 0).unwrap();

        let mut counts: HashMap<i64, u64> = HashMap::new();
        for &id in tensor.as_slice() {
            if id != NO_SAMPLE {
                assert!((0..400).contains(&id));
                *counts.entry(id).or_default() += 1;
            }
        }
        assert!(tensor.num_samples() as u64 >= dataset.epoch_size());

        // 600 samples split evenly over canonical nodes and ranks, so
        // nothing is repeated.
        assert_eq!(tensor.num_samples(), 600);
        let from_a: u64 = counts.iter().filter(|(id, _)| **id < 200).map(|(_, n)| n).sum();
        assert_eq!(from_a, 150);
    }

    #[test]
    fn test_iter_is_deterministic_and_varies_by_epoch() {
        let dataset =
            Dataset::with_source(two_stream_config(), &in_memory(vec![40, 60, 100])).unwrap();
        let physical = PhysicalTopology::new(4, 1, 1);
        let a = dataset.iter(0, &physical, 0).unwrap();
        let b = dataset.iter(0, &physical, 0).unwrap();
        let c = dataset.iter(1, &physical, 0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_iter_resumes_across_topologies() {
        let dataset =
            Dataset::with_source(two_stream_config(), &in_memory(vec![40, 60, 100])).unwrap();

        // The same canonical layout is visited in the same global order on
        // 2 or 4 nodes, so a run can resume on a different node count.
        let order = |nodes: u64, offset: u64| -> Vec<i64> {
            let tensor = dataset
                .iter(2, &PhysicalTopology::new(nodes, 1, 1), offset)
                .unwrap();
            let mut order = Vec::new();
            for step in 0..tensor.batches_per_worker() {
                for pos in 0..tensor.batch_size() {
                    for node in 0..tensor.num_nodes() {
                        match tensor.get([node, 0, 0, step, pos]) {
                            Some(id) if id != NO_SAMPLE => order.push(id),
                            _ => {}
                        }
                    }
                }
            }
            order
        };

        let full = order(2, 0);
        assert_eq!(full.len(), 600);
        assert_eq!(order(4, 0), full);
        assert_eq!(order(4, 300), full[300..]);
        assert_eq!(order(2, 301), full[300..]);
    }

    #[test]
    fn test_topology_errors_surface() {
        let dataset =
            Dataset::with_source(two_stream_config(), &in_memory(vec![40, 60, 100])).unwrap();
        let err = dataset.iter(0, &PhysicalTopology::new(3, 1, 1), 0).unwrap_err();
        assert!(matches!(err, OrderError::Topology { .. }));

        let err = dataset.iter(0, &PhysicalTopology::new(2, 1, 1), 600).unwrap_err();
        assert!(matches!(err, OrderError::Topology { .. }));
    }

    #[test]
    fn test_cancelled_iteration() {
        let dataset =
            Dataset::with_source(single_stream_config(), &in_memory(vec![10])).unwrap();
        let token = dataset.cancellation_token();
        token.cancel();
        let err = dataset.iter(0, &PhysicalTopology::new(1, 1, 1), 0).unwrap_err();
        assert!(matches!(err, OrderError::Cancelled));

        token.reset();
        assert!(dataset.iter(0, &PhysicalTopology::new(1, 1, 1), 0).is_ok());
    }

    #[test]
    fn test_bench_reports_timings() {
        let dataset =
            Dataset::with_source(two_stream_config(), &in_memory(vec![40, 60, 100])).unwrap();
        let (tensor, timings) = dataset.bench(0, &PhysicalTopology::new(2, 1, 1), 0).unwrap();
        assert_eq!(tensor, dataset.iter(0, &PhysicalTopology::new(2, 1, 1), 0).unwrap());
        assert!(timings.total >= timings.map);
    }

    #[test]
    fn test_from_config_file_reads_index_files() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("index.json"),
            r#"{"shards": [{"samples": 6}, {"samples": 4}]}"#,
        )
        .unwrap();

        let config_path = temp_dir.path().join("order.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            "shuffle = true\n\n[stream]\nlocal = \"{}\"\nchoose = 15",
            data_dir.display()
        )
        .unwrap();

        let dataset = Dataset::from_config_file(&config_path).unwrap();
        assert_eq!(dataset.num_samples(), 10);
        assert_eq!(dataset.epoch_size(), 15);

        let tensor = dataset.iter(0, &PhysicalTopology::new(1, 1, 1), 0).unwrap();
        assert_eq!(tensor.num_samples(), 15);
        assert!(tensor.as_slice().iter().all(|id| (0..10).contains(id)));
    }
}
