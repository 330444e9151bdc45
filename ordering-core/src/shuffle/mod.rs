// ordering-core/src/shuffle/mod.rs

//! Locality-aware shuffling of the virtual sample space.
//!
//! A shuffle is a permutation of `[0, total)` over an epoch's virtual IDs.
//! Except for [`Shuffler::Naive`], every shuffler only moves samples within
//! the range a canonical node owns, so each node keeps downloading the same
//! shards for the whole run. The variants differ in how much they mix
//! within a node:
//!
//! | algo   | shuffles within        |
//! |--------|------------------------|
//! | naive  | the whole epoch        |
//! | s1n    | each node              |
//! | s1b    | fixed-size blocks      |
//! | s1br   | randomly sized blocks  |
//! | s1s    | each span              |

mod naive;
mod s1b;
mod s1br;
mod s1n;
mod s1s;
pub mod spans;

pub use spans::{break_spans_over_nodes, shuffle_shards, NodeSpans, Span};

use tracing::debug;

use crate::config::ShufflerConfig;
use crate::error::{OrderError, Result};

/// Names of all shuffling algorithms, as accepted in configuration.
pub const ALGOS: [&str; 5] = ["naive", "s1n", "s1b", "s1br", "s1s"];

/// A shuffling algorithm and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shuffler {
    /// Shuffle everything at once. Breaks node locality.
    Naive { seed: u64 },
    /// Shuffle each canonical node's share as one block.
    Node { seed: u64 },
    /// Shuffle fixed-size blocks of each node's share.
    Block { seed: u64, block_size: u64 },
    /// Shuffle blocks of each node's share, sized uniformly at random.
    RandomBlock {
        seed: u64,
        min_block_size: u64,
        max_block_size: u64,
    },
    /// Shuffle within each span.
    Span { seed: u64 },
}

impl Shuffler {
    /// Builds the shuffler named by `config.algo`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown algorithm or invalid
    /// block sizes.
    pub fn from_config(config: &ShufflerConfig) -> Result<Self> {
        let seed = config.seed;
        match config.algo.as_str() {
            "naive" => Ok(Self::Naive { seed }),
            "s1n" => Ok(Self::Node { seed }),
            "s1b" => {
                if config.block_size == 0 {
                    return Err(OrderError::config(
                        "shuffler.block_size must be greater than 0",
                    ));
                }
                Ok(Self::Block {
                    seed,
                    block_size: config.block_size,
                })
            }
            "s1br" => {
                if config.min_block_size == 0 {
                    return Err(OrderError::config(
                        "shuffler.min_block_size must be greater than 0",
                    ));
                }
                if config.max_block_size < config.min_block_size {
                    return Err(OrderError::config(format!(
                        "shuffler.min_block_size ({}) must not exceed shuffler.max_block_size ({})",
                        config.min_block_size, config.max_block_size
                    )));
                }
                Ok(Self::RandomBlock {
                    seed,
                    min_block_size: config.min_block_size,
                    max_block_size: config.max_block_size,
                })
            }
            "s1s" => Ok(Self::Span { seed }),
            other => Err(OrderError::config(format!(
                "unknown shuffle algorithm: '{other}' (must be one of {})",
                ALGOS.join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Naive { .. } => "naive",
            Self::Node { .. } => "s1n",
            Self::Block { .. } => "s1b",
            Self::RandomBlock { .. } => "s1br",
            Self::Span { .. } => "s1s",
        }
    }

    pub fn seed(&self) -> u64 {
        match *self {
            Self::Naive { seed }
            | Self::Node { seed }
            | Self::Block { seed, .. }
            | Self::RandomBlock { seed, .. }
            | Self::Span { seed } => seed,
        }
    }

    /// Returns `ids` where `ids[i]` is the virtual ID visited at position `i`.
    ///
    /// # Errors
    ///
    /// Returns a topology error if `num_nodes` is zero.
    pub fn shuffle(&self, subshard_sizes: &[u64], num_nodes: u64, epoch: u64) -> Result<Vec<i64>> {
        if num_nodes == 0 {
            return Err(OrderError::topology("cannot shuffle over zero canonical nodes"));
        }

        let ids = match *self {
            Self::Naive { seed } => naive::shuffle(subshard_sizes, seed, epoch),
            Self::Node { seed } => s1n::shuffle(subshard_sizes, num_nodes, seed, epoch),
            Self::Block { seed, block_size } => {
                s1b::shuffle(subshard_sizes, num_nodes, seed, epoch, block_size)
            }
            Self::RandomBlock {
                seed,
                min_block_size,
                max_block_size,
            } => s1br::shuffle(
                subshard_sizes,
                num_nodes,
                seed,
                epoch,
                min_block_size,
                max_block_size,
            ),
            Self::Span { seed } => s1s::shuffle(subshard_sizes, num_nodes, seed, epoch),
        };

        debug!(
            algo = self.name(),
            samples = ids.len(),
            subshards = subshard_sizes.len(),
            num_nodes,
            epoch,
            "Shuffled epoch"
        );
        Ok(ids)
    }
}
