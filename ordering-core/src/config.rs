// ordering-core/src/config.rs

//! Configuration for the sample ordering pipeline.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::determiner::DeterminerAlgo;
use crate::error::{OrderError, Result};
use crate::sampler::SamplerAlgo;
use crate::shuffle::Shuffler;
use crate::stream::{cross_check_weights, Stream};

// Top-level ordering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    /// Whether to shuffle samples within each canonical node.
    pub shuffle: bool,
    pub shard_index: ShardIndexConfig,
    pub sampler: SamplerConfig,
    pub determiner: DeterminerConfig,
    pub shuffler: ShufflerConfig,
    /// Defaults shared by all streams, or the only stream if `streams` is empty.
    pub stream: StreamConfig,
    /// Named streams. Iterated in name order.
    pub streams: BTreeMap<String, StreamConfig>,
}

/// Whether the sampler reseeds every epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    /// Seed with `seed + epoch`, so each epoch draws a different resample.
    #[default]
    Balanced,
    /// Seed with `seed`, so every epoch draws the same resample.
    Fixed,
}

impl FromStr for SamplingStrategy {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "fixed" => Ok(Self::Fixed),
            _ => Err(OrderError::config(format!(
                "unknown sampling strategy: '{s}' (must be 'balanced' or 'fixed')"
            ))),
        }
    }
}

// Shard index tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardIndexConfig {
    // Samples per lookup bucket; trades index memory for lookup speed.
    pub bucket_size: u64,
}

/// Sampler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling algorithm. Only "m2" is available.
    pub algo: String,
    pub seed: u64,
    /// Samples per epoch. Derived from stream weights when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch_size: Option<u64>,
    pub strategy: SamplingStrategy,
}

/// Determiner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeterminerConfig {
    /// Partitioning algorithm. Only "fast" is available.
    pub algo: String,
    /// Topology-independent node count the epoch is partitioned over.
    pub canonical_nodes: u64,
    pub batch_size: u64,
}

/// Shuffler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShufflerConfig {
    /// One of "naive", "s1n", "s1b", "s1br", "s1s".
    pub algo: String,
    pub seed: u64,
    /// Block size for "s1b".
    pub block_size: u64,
    /// Block size range for "s1br".
    pub min_block_size: u64,
    pub max_block_size: u64,
}

/// Per-stream configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Remote, persistent copy of the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// Local cache directory. Derived from `remote` and `split` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    /// Subdirectory appended to `remote` and `local`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    /// Index file name, relative to the split directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Share of each epoch drawn from this stream (relative weighting).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proportion: Option<f64>,
    /// Expected times each sample is seen per epoch (absolute weighting).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<f64>,
    /// Samples drawn from this stream per epoch (absolute weighting).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choose: Option<u64>,
}

impl Default for ShardIndexConfig {
    fn default() -> Self {
        Self { bucket_size: 1024 }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            algo: "m2".to_string(),
            seed: 1337,
            epoch_size: None,
            strategy: SamplingStrategy::Balanced,
        }
    }
}

impl Default for DeterminerConfig {
    fn default() -> Self {
        Self {
            algo: "fast".to_string(),
            canonical_nodes: 1,
            batch_size: 1,
        }
    }
}

impl Default for ShufflerConfig {
    fn default() -> Self {
        Self {
            algo: "s1br".to_string(),
            seed: 1337,
            block_size: 1 << 20,
            min_block_size: 1 << 19,
            max_block_size: 1 << 20,
        }
    }
}

impl FromStr for OrderConfig {
    type Err = OrderError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| OrderError::config_with_source("failed to parse TOML config", e))
    }
}

impl OrderConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrderError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `XTR_` and use underscores
    // to separate nested fields. For example:
    // - `XTR_SHUFFLE` overrides `shuffle`
    // - `XTR_SAMPLER_SEED` overrides `sampler.seed`
    // - `XTR_DETERMINER_CANONICAL_NODES` overrides `determiner.canonical_nodes`
    // - `XTR_SHUFFLER_ALGO` overrides `shuffler.algo`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("XTR_SHUFFLE") {
            if let Ok(v) = val.parse() {
                self.shuffle = v;
            }
        }
        if let Ok(val) = std::env::var("XTR_SHARD_INDEX_BUCKET_SIZE") {
            if let Ok(v) = val.parse() {
                self.shard_index.bucket_size = v;
            }
        }

        // Sampler overrides
        if let Ok(val) = std::env::var("XTR_SAMPLER_SEED") {
            if let Ok(v) = val.parse() {
                self.sampler.seed = v;
            }
        }
        if let Ok(val) = std::env::var("XTR_SAMPLER_EPOCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.sampler.epoch_size = Some(v);
            }
        }
        if let Ok(val) = std::env::var("XTR_SAMPLER_STRATEGY") {
            if let Ok(v) = val.to_lowercase().parse() {
                self.sampler.strategy = v;
            }
        }

        // Determiner overrides
        if let Ok(val) = std::env::var("XTR_DETERMINER_CANONICAL_NODES") {
            if let Ok(v) = val.parse() {
                self.determiner.canonical_nodes = v;
            }
        }
        if let Ok(val) = std::env::var("XTR_DETERMINER_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.determiner.batch_size = v;
            }
        }

        // Shuffler overrides
        if let Ok(val) = std::env::var("XTR_SHUFFLER_ALGO") {
            self.shuffler.algo = val.to_lowercase();
        }
        if let Ok(val) = std::env::var("XTR_SHUFFLER_SEED") {
            if let Ok(v) = val.parse() {
                self.shuffler.seed = v;
            }
        }
        if let Ok(val) = std::env::var("XTR_SHUFFLER_BLOCK_SIZE") {
            if let Ok(v) = val.parse() {
                self.shuffler.block_size = v;
            }
        }
        if let Ok(val) = std::env::var("XTR_SHUFFLER_MIN_BLOCK_SIZE") {
            if let Ok(v) = val.parse() {
                self.shuffler.min_block_size = v;
            }
        }
        if let Ok(val) = std::env::var("XTR_SHUFFLER_MAX_BLOCK_SIZE") {
            if let Ok(v) = val.parse() {
                self.shuffler.max_block_size = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.shard_index.bucket_size == 0 {
            return Err(OrderError::config(
                "shard_index.bucket_size must be greater than 0",
            ));
        }

        self.sampler.algo.parse::<SamplerAlgo>()?;
        if self.sampler.epoch_size == Some(0) {
            return Err(OrderError::config(
                "sampler.epoch_size must be greater than 0",
            ));
        }

        self.determiner.algo.parse::<DeterminerAlgo>()?;
        if self.determiner.canonical_nodes == 0 {
            return Err(OrderError::config(
                "determiner.canonical_nodes must be greater than 0",
            ));
        }
        if self.determiner.batch_size == 0 {
            return Err(OrderError::config(
                "determiner.batch_size must be greater than 0",
            ));
        }

        Shuffler::from_config(&self.shuffler)?;

        let streams = self.build_streams()?;
        cross_check_weights(&streams)?;

        Ok(())
    }

    /// Builds the configured streams, in order.
    ///
    /// If `streams` is empty, `stream` is the single stream. Otherwise `stream`
    /// only supplies defaults and must not name a location.
    pub fn build_streams(&self) -> Result<Vec<Stream>> {
        if self.streams.is_empty() {
            return Ok(vec![Stream::from_config(
                "default",
                &self.stream,
                &StreamConfig::default(),
            )?]);
        }

        if self.stream.remote.is_some() || self.stream.local.is_some() || self.stream.split.is_some()
        {
            return Err(OrderError::config(
                "when `streams` is given, `stream` only holds defaults for them and its \
                 `remote`, `local`, and `split` fields are meaningless",
            ));
        }

        self.streams
            .iter()
            .map(|(name, config)| Stream::from_config(name.as_str(), config, &self.stream))
            .collect()
    }
}
