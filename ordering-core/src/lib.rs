// ordering-core/src/lib.rs

//! Sample Ordering - Core Library
//!
//! This crate computes deterministic, resumable iteration orders for
//! distributed training over sharded, weighted, multi-stream datasets. It
//! covers stream weighting and per-epoch resampling, elastic partitioning of
//! an epoch over canonical and physical nodes, locality-aware shuffling, and
//! the pipeline that composes them into tensors of physical sample IDs.

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{OrderConfig, SamplingStrategy};
pub use error::{OrderError, Result};

pub mod spanner;
pub use spanner::SpanIndex;

pub mod tensor;
pub use tensor::{SampleTensor, NO_SAMPLE};

pub mod stream;
pub use stream::{IndexFileSource, Shard, ShardSource, Stream};

pub mod sampler;
pub use sampler::{Sampler, SamplerAlgo, Sampling};

pub mod determiner;
pub use determiner::{Determiner, DeterminerAlgo, PhysicalTopology};

pub mod shuffle;
pub use shuffle::Shuffler;

pub mod dataset;
pub use dataset::{CancellationToken, Dataset, StageTimings};
