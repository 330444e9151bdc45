// ordering-core/src/stream/mod.rs

//! Streams, shards, and the shard catalog.
//!
//! A dataset is a list of streams, each contributing a run of shards to one
//! flat shard arena. Streams refer to their shards by `(shard_offset,
//! num_shards)` ranges into that arena, and every shard knows its first
//! physical sample ID in the concatenated sample space.
//!
//! Stream weights are resolved once, after shards are loaded, into an exact
//! per-epoch `choose` count for each stream (see [`weights`]).

mod catalog;
pub mod weights;

pub use catalog::{load_shards, IndexFileSource, ShardSource};
pub use weights::{cross_check_weights, derive_sampling};

use std::hash::Hasher;
use std::path::PathBuf;

use twox_hash::XxHash64;

use crate::config::StreamConfig;
use crate::error::{OrderError, Result};

/// Index file name used when a stream does not name one.
pub const DEFAULT_INDEX: &str = "index.json";

/// One shard of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    /// Stream this shard belongs to.
    pub stream_id: usize,
    /// Number of samples in the shard.
    pub num_samples: u64,
    /// Physical ID of the shard's first sample over all streams.
    pub sample_offset: u64,
}

impl Shard {
    /// Physical sample IDs covered by this shard.
    pub fn sample_range(&self) -> std::ops::Range<u64> {
        self.sample_offset..self.sample_offset + self.num_samples
    }
}

/// A weighted source of shards.
#[derive(Debug, Clone)]
pub struct Stream {
    name: String,
    remote: Option<String>,
    local: PathBuf,
    split: Option<String>,
    index: String,

    // Weights as configured. At most one is set.
    proportion: Option<f64>,
    repeat: Option<f64>,
    choose: Option<u64>,

    // Weights as resolved by `derive_sampling`.
    resolved_proportion: f64,
    resolved_repeat: f64,
    resolved_choose: u64,

    shard_offset: usize,
    num_shards: usize,
    sample_offset: u64,
    num_samples: u64,
}

impl Stream {
    /// Builds a stream from its config, falling back to `defaults` for the
    /// fields streams may share.
    pub fn from_config(
        name: impl Into<String>,
        config: &StreamConfig,
        defaults: &StreamConfig,
    ) -> Result<Self> {
        let name = name.into();

        let remote = config.remote.clone().filter(|s| !s.is_empty());
        let split = config.split.clone().filter(|s| !s.is_empty());
        let local = match config.local.as_ref().filter(|s| !s.is_empty()) {
            Some(local) => PathBuf::from(local),
            None => match &remote {
                Some(remote) => derive_local(remote, split.as_deref()),
                None => {
                    return Err(OrderError::stream(
                        name,
                        "at least one of `remote` and `local` must be provided",
                    ));
                }
            },
        };

        let index = config
            .index
            .clone()
            .or_else(|| defaults.index.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_INDEX.to_string());

        let num_weights = [
            config.proportion.is_some(),
            config.repeat.is_some(),
            config.choose.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if num_weights > 1 {
            return Err(OrderError::stream(
                name,
                "at most one type of weight (`proportion`, `repeat`, `choose`) can be used",
            ));
        }
        if let Some(proportion) = config.proportion {
            if !(proportion.is_finite() && proportion >= 0.0) {
                return Err(OrderError::stream(
                    name,
                    format!("`proportion` must be a non-negative number, got {proportion}"),
                ));
            }
        }
        if let Some(repeat) = config.repeat {
            if !(repeat.is_finite() && repeat >= 0.0) {
                return Err(OrderError::stream(
                    name,
                    format!("`repeat` must be a non-negative number, got {repeat}"),
                ));
            }
        }

        Ok(Self {
            name,
            remote,
            local,
            split,
            index,
            proportion: config.proportion,
            repeat: config.repeat,
            choose: config.choose,
            resolved_proportion: 0.0,
            resolved_repeat: 0.0,
            resolved_choose: 0,
            shard_offset: 0,
            num_shards: 0,
            sample_offset: 0,
            num_samples: 0,
        })
    }

    /// Builds an unweighted stream that is only ever fed from memory.
    pub fn in_memory(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            local: PathBuf::from(&name),
            name,
            remote: None,
            split: None,
            index: DEFAULT_INDEX.to_string(),
            proportion: None,
            repeat: None,
            choose: None,
            resolved_proportion: 0.0,
            resolved_repeat: 0.0,
            resolved_choose: 0,
            shard_offset: 0,
            num_shards: 0,
            sample_offset: 0,
            num_samples: 0,
        }
    }

    pub fn with_proportion(mut self, proportion: f64) -> Self {
        self.proportion = Some(proportion);
        self.repeat = None;
        self.choose = None;
        self
    }

    pub fn with_repeat(mut self, repeat: f64) -> Self {
        self.proportion = None;
        self.repeat = Some(repeat);
        self.choose = None;
        self
    }

    pub fn with_choose(mut self, choose: u64) -> Self {
        self.proportion = None;
        self.repeat = None;
        self.choose = Some(choose);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn split(&self) -> Option<&str> {
        self.split.as_deref()
    }

    /// Path of this stream's index file in its local cache directory.
    pub fn index_path(&self) -> PathBuf {
        let mut path = self.local.clone();
        if let Some(split) = &self.split {
            path.push(split);
        }
        path.push(&self.index);
        path
    }

    pub fn local(&self) -> &std::path::Path {
        &self.local
    }

    pub fn proportion(&self) -> f64 {
        self.resolved_proportion
    }

    pub fn repeat(&self) -> f64 {
        self.resolved_repeat
    }

    /// Samples drawn from this stream per epoch.
    pub fn choose(&self) -> u64 {
        self.resolved_choose
    }

    pub fn configured_proportion(&self) -> Option<f64> {
        self.proportion
    }

    pub fn configured_repeat(&self) -> Option<f64> {
        self.repeat
    }

    pub fn configured_choose(&self) -> Option<u64> {
        self.choose
    }

    pub fn shard_offset(&self) -> usize {
        self.shard_offset
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Range of this stream's shards in the shard arena.
    pub fn shard_range(&self) -> std::ops::Range<usize> {
        self.shard_offset..self.shard_offset + self.num_shards
    }

    pub fn sample_offset(&self) -> u64 {
        self.sample_offset
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    pub(crate) fn set_layout(
        &mut self,
        shard_offset: usize,
        num_shards: usize,
        sample_offset: u64,
        num_samples: u64,
    ) {
        self.shard_offset = shard_offset;
        self.num_shards = num_shards;
        self.sample_offset = sample_offset;
        self.num_samples = num_samples;
    }

    pub(crate) fn set_resolved(&mut self, proportion: f64, repeat: f64, choose: u64) {
        self.resolved_proportion = proportion;
        self.resolved_repeat = repeat;
        self.resolved_choose = choose;
    }
}

/// Cache directory for a stream that only names a remote.
fn derive_local(remote: &str, split: Option<&str>) -> PathBuf {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(remote.as_bytes());
    hasher.write(&[0]);
    hasher.write(split.unwrap_or_default().as_bytes());
    std::env::temp_dir()
        .join("xtreaming")
        .join(format!("{:016x}", hasher.finish()))
}

/// Lays out per-stream shard sample counts into one shard arena.
///
/// Assigns every stream its shard range and sample range, and every shard its
/// physical sample offset, in stream order.
pub fn situate_shards(streams: &mut [Stream], shard_lists: Vec<Vec<u64>>) -> Vec<Shard> {
    let num_shards = shard_lists.iter().map(Vec::len).sum();
    let mut shards = Vec::with_capacity(num_shards);
    let mut sample_offset = 0u64;

    for (stream_id, (stream, sizes)) in streams.iter_mut().zip(shard_lists).enumerate() {
        let shard_offset = shards.len();
        let stream_sample_offset = sample_offset;
        for num_samples in sizes {
            shards.push(Shard {
                stream_id,
                num_samples,
                sample_offset,
            });
            sample_offset += num_samples;
        }
        stream.set_layout(
            shard_offset,
            shards.len() - shard_offset,
            stream_sample_offset,
            sample_offset - stream_sample_offset,
        );
    }

    shards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_remote_or_local() {
        let config = StreamConfig::default();
        let result = Stream::from_config("s", &config, &StreamConfig::default());
        assert!(result.unwrap_err().to_string().contains("remote"));
    }

    #[test]
    fn test_derived_local_is_stable() {
        let config = StreamConfig {
            remote: Some("s3://bucket/data".to_string()),
            split: Some("train".to_string()),
            ..Default::default()
        };
        let a = Stream::from_config("a", &config, &StreamConfig::default()).unwrap();
        let b = Stream::from_config("b", &config, &StreamConfig::default()).unwrap();
        assert_eq!(a.local(), b.local());
        assert!(a.index_path().ends_with("train/index.json"));

        let other = StreamConfig {
            split: Some("val".to_string()),
            ..config
        };
        let c = Stream::from_config("c", &other, &StreamConfig::default()).unwrap();
        assert_ne!(a.local(), c.local());
    }

    #[test]
    fn test_index_falls_back_to_defaults() {
        let config = StreamConfig {
            local: Some("/data/a".to_string()),
            ..Default::default()
        };
        let defaults = StreamConfig {
            index: Some("shards.json".to_string()),
            ..Default::default()
        };
        let stream = Stream::from_config("a", &config, &defaults).unwrap();
        assert_eq!(stream.index_path(), PathBuf::from("/data/a/shards.json"));
    }

    #[test]
    fn test_rejects_multiple_weights() {
        let config = StreamConfig {
            local: Some("/data".to_string()),
            proportion: Some(0.5),
            choose: Some(10),
            ..Default::default()
        };
        let result = Stream::from_config("s", &config, &StreamConfig::default());
        assert!(result.unwrap_err().to_string().contains("at most one"));
    }

    #[test]
    fn test_rejects_negative_repeat() {
        let config = StreamConfig {
            local: Some("/data".to_string()),
            repeat: Some(-2.0),
            ..Default::default()
        };
        assert!(Stream::from_config("s", &config, &StreamConfig::default()).is_err());
    }

    #[test]
    fn test_situate_shards() {
        let mut streams = vec![Stream::in_memory("a"), Stream::in_memory("b")];
        let shards = situate_shards(&mut streams, vec![vec![3, 4], vec![5]]);

        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].sample_range(), 0..3);
        assert_eq!(shards[1].sample_range(), 3..7);
        assert_eq!(shards[2].sample_range(), 7..12);
        assert_eq!(shards[2].stream_id, 1);

        assert_eq!(streams[0].shard_range(), 0..2);
        assert_eq!(streams[0].num_samples(), 7);
        assert_eq!(streams[1].shard_range(), 2..3);
        assert_eq!(streams[1].sample_offset(), 7);
        assert_eq!(streams[1].num_samples(), 5);
    }
}
