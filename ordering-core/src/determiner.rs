// ordering-core/src/determiner.rs

//! Elastic, deterministic partitioning of an epoch over nodes, ranks, and
//! workers.
//!
//! The epoch is first split over a fixed number of *canonical* nodes, which
//! never changes during a run. Canonical rows are then reshaped onto however
//! many physical nodes the current run has, which must evenly divide or be
//! evenly divided by the canonical node count. Because the canonical layout
//! is fixed, a run can be resumed mid-epoch on a different physical topology
//! and still visit the samples in the same global order.
//!
//! Nothing here is random.

use std::ops::Range;
use std::str::FromStr;

use crate::config::DeterminerConfig;
use crate::error::{OrderError, Result};
use crate::tensor::{SampleTensor, NO_SAMPLE};

/// Available partitioning algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeterminerAlgo {
    Fast,
}

impl DeterminerAlgo {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
        }
    }
}

impl FromStr for DeterminerAlgo {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Self::Fast),
            _ => Err(OrderError::config(format!(
                "unknown determiner algorithm: '{s}' (must be 'fast')"
            ))),
        }
    }
}

/// The current run's hardware layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalTopology {
    pub nodes: u64,
    pub ranks_per_node: u64,
    pub workers_per_rank: u64,
}

impl PhysicalTopology {
    pub fn new(nodes: u64, ranks_per_node: u64, workers_per_rank: u64) -> Self {
        Self {
            nodes,
            ranks_per_node,
            workers_per_rank,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(OrderError::topology("physical node count must be positive"));
        }
        if self.ranks_per_node == 0 {
            return Err(OrderError::topology("ranks per node must be positive"));
        }
        if self.workers_per_rank == 0 {
            return Err(OrderError::topology("workers per rank must be positive"));
        }
        Ok(())
    }
}

/// Half-open range of items owned by one of `num_nodes` nodes.
///
/// The first `total % num_nodes` nodes get one item more than the rest.
pub fn canonical_node_bounds(total: u64, num_nodes: u64, node: u64) -> Range<u64> {
    let base = total / num_nodes;
    let overflow = total % num_nodes;
    let begin = node * base + node.min(overflow);
    let len = if node < overflow { base + 1 } else { base };
    begin..begin + len
}

/// Lays out an epoch's virtual sample IDs for the current topology.
#[derive(Debug, Clone)]
pub struct Determiner {
    algo: DeterminerAlgo,
    canonical_nodes: u64,
    batch_size: u64,
}

impl Determiner {
    /// # Errors
    ///
    /// Returns a configuration error if `canonical_nodes` or `batch_size` is zero.
    pub fn new(algo: DeterminerAlgo, canonical_nodes: u64, batch_size: u64) -> Result<Self> {
        if canonical_nodes == 0 {
            return Err(OrderError::config("canonical_nodes must be positive"));
        }
        if batch_size == 0 {
            return Err(OrderError::config("batch_size must be positive"));
        }
        Ok(Self {
            algo,
            canonical_nodes,
            batch_size,
        })
    }

    pub fn from_config(config: &DeterminerConfig) -> Result<Self> {
        Self::new(
            config.algo.parse()?,
            config.canonical_nodes,
            config.batch_size,
        )
    }

    pub fn algo(&self) -> DeterminerAlgo {
        self.algo
    }

    pub fn canonical_nodes(&self) -> u64 {
        self.canonical_nodes
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Builds the `(node, rank, worker, batch, position)` tensor of virtual
    /// sample IDs, resuming at `sample_offset`.
    ///
    /// `sample_offset` is rounded down to a multiple of the physical node
    /// count. Slots with no sample hold [`NO_SAMPLE`].
    ///
    /// Canonical rows are evened out by repeating each short row's last
    /// sample, so the tensor holds exactly `epoch_size - sample_offset`
    /// samples when `epoch_size` divides evenly over canonical nodes, and a
    /// few repeats more otherwise. Rank, worker, and batch shortfalls are
    /// sentinels.
    ///
    /// # Errors
    ///
    /// Returns a topology error if any count is zero, the canonical and
    /// physical node counts are not codivisible, or `sample_offset` is not
    /// inside the epoch.
    pub fn determine(
        &self,
        physical: &PhysicalTopology,
        epoch_size: u64,
        sample_offset: u64,
    ) -> Result<SampleTensor> {
        physical.validate()?;
        if epoch_size == 0 {
            return Err(OrderError::topology("epoch size must be positive"));
        }
        let canonical = self.canonical_nodes;
        let nodes = physical.nodes;
        if canonical % nodes != 0 && nodes % canonical != 0 {
            return Err(OrderError::topology(format!(
                "canonical nodes ({canonical}) and physical nodes ({nodes}) must be \
                 codivisible: one must evenly divide the other"
            )));
        }
        if sample_offset >= epoch_size {
            return Err(OrderError::topology(format!(
                "sample offset {sample_offset} is past the end of an epoch of {epoch_size} samples"
            )));
        }

        match self.algo {
            DeterminerAlgo::Fast => self.determine_fast(physical, epoch_size, sample_offset),
        }
    }

    fn determine_fast(
        &self,
        physical: &PhysicalTopology,
        epoch_size: u64,
        sample_offset: u64,
    ) -> Result<SampleTensor> {
        let layout = Layout::new(self.canonical_nodes, physical.nodes, epoch_size, sample_offset);
        let ranks = physical.ranks_per_node;
        let workers = physical.workers_per_rank;
        let batch_size = self.batch_size;

        // Each node's row is dealt out to ranks round-robin. Ranks left one
        // sample short get a sentinel instead.
        let node_len = layout.node_len();
        let per_rank = node_len.div_ceil(ranks);

        // Each rank's samples are padded out to whole batches for every worker,
        // and batches are dealt out to workers round-robin.
        let per_round = workers * batch_size;
        let batches_per_worker = per_rank.div_ceil(per_round);

        let shape = [
            physical.nodes as usize,
            ranks as usize,
            workers as usize,
            batches_per_worker as usize,
            batch_size as usize,
        ];
        let mut ids = Vec::with_capacity(shape.iter().product());

        for node in 0..physical.nodes {
            for rank in 0..ranks {
                for worker in 0..workers {
                    for batch in 0..batches_per_worker {
                        for pos in 0..batch_size {
                            let k = (batch * workers + worker) * batch_size + pos;
                            let i = k * ranks + rank;
                            if k < per_rank && i < node_len {
                                ids.push(layout.node_entry(node, i));
                            } else {
                                ids.push(NO_SAMPLE);
                            }
                        }
                    }
                }
            }
        }

        SampleTensor::from_vec(shape, ids)
    }
}

/// Canonical rows reshaped onto physical nodes.
struct Layout {
    canonical: u64,
    physical: u64,
    epoch_size: u64,
    columns: u64,
    skip: u64,
}

impl Layout {
    fn new(canonical: u64, physical: u64, epoch_size: u64, sample_offset: u64) -> Self {
        // All canonical rows share one length, the longest row's. When a
        // canonical row is striped over several physical nodes, it is padded
        // further so that it stripes evenly.
        let mut row_len = epoch_size.div_ceil(canonical);
        if canonical < physical {
            let ratio = physical / canonical;
            row_len = row_len.div_ceil(ratio) * ratio;
        }
        let columns = row_len * canonical / physical;
        // Whole columns only, so resumption restarts on a node boundary.
        let skip = sample_offset / physical;

        Self {
            canonical,
            physical,
            epoch_size,
            columns,
            skip,
        }
    }

    /// Samples per physical node after resuming.
    fn node_len(&self) -> u64 {
        self.columns - self.skip
    }

    /// Sample at position `i` of a physical node's resumed row.
    ///
    /// Reading the canonical matrix column by column and dealing entries to
    /// physical nodes round-robin keeps canonical row `c` on node
    /// `c % physical`, or stripes it over nodes `c, c + canonical, ...` when
    /// there are more physical nodes than canonical ones.
    fn node_entry(&self, node: u64, i: u64) -> i64 {
        let flat = (self.skip + i) * self.physical + node;
        self.canonical_entry(flat % self.canonical, flat / self.canonical)
    }

    /// Entry `j` of canonical row `row`; past the row's end, its last sample.
    fn canonical_entry(&self, row: u64, j: u64) -> i64 {
        let bounds = canonical_node_bounds(self.epoch_size, self.canonical, row);
        let len = bounds.end - bounds.start;
        // Empty rows only follow non-empty ones, so they repeat the sample
        // just before them.
        bounds.start as i64 + (j as i64).min(len as i64 - 1)
    }
}
