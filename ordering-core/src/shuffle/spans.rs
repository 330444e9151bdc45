// ordering-core/src/shuffle/spans.rs

//! Shard spans and their assignment to canonical nodes.
//!
//! Every locality-aware shuffler starts here. Subshards become spans of
//! virtual IDs, the span order is shuffled with the run seed (so the
//! shard-to-node assignment is stable for a whole run), spans are cut at
//! canonical node boundaries, and finally each node's span order is shuffled
//! with the epoch seed.

use std::ops::Range;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::determiner::canonical_node_bounds;

/// Half-open range of virtual sample IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub begin: u64,
    pub end: u64,
}

impl Span {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Spans grouped by canonical node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpans {
    /// All spans, node by node.
    pub spans: Vec<Span>,
    /// Range of `spans` belonging to each node.
    pub nodes: Vec<Range<usize>>,
    /// Total number of samples.
    pub total: u64,
}

impl NodeSpans {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Spans assigned to one node.
    pub fn node_spans(&self, node: usize) -> &[Span] {
        &self.spans[self.nodes[node].clone()]
    }

    /// Output positions owned by one node.
    pub fn node_range(&self, node: usize) -> Range<usize> {
        let bounds = canonical_node_bounds(self.total, self.nodes.len() as u64, node as u64);
        bounds.start as usize..bounds.end as usize
    }

    /// Writes out every span's IDs in span order.
    pub fn lay_out(&self) -> Vec<i64> {
        let mut ids = Vec::with_capacity(self.total as usize);
        for span in &self.spans {
            ids.extend((span.begin..span.end).map(|id| id as i64));
        }
        ids
    }
}

/// Builds spans, assigns them to nodes, and returns the epoch RNG for
/// further intra-node shuffling.
pub fn shuffle_shards(
    subshard_sizes: &[u64],
    num_nodes: u64,
    seed: u64,
    epoch: u64,
) -> (NodeSpans, ChaCha8Rng) {
    let mut spans = Vec::with_capacity(subshard_sizes.len());
    let mut total = 0u64;
    for &size in subshard_sizes {
        if size > 0 {
            spans.push(Span::new(total, total + size));
        }
        total += size;
    }

    // Fixed for the run.
    let mut run_rng = ChaCha8Rng::seed_from_u64(seed);
    spans.shuffle(&mut run_rng);

    let mut layout = break_spans_over_nodes(spans, total, num_nodes);

    // Different every epoch.
    let mut epoch_rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch));
    for node in layout.nodes.clone() {
        layout.spans[node].shuffle(&mut epoch_rng);
    }

    (layout, epoch_rng)
}

/// Cuts an ordered list of spans into per-node runs.
///
/// Nodes take spans in order until they hold their share of samples. The
/// span straddling a node boundary is split, and its remainder starts the
/// next node.
pub fn break_spans_over_nodes(spans: Vec<Span>, total: u64, num_nodes: u64) -> NodeSpans {
    let mut out = Vec::with_capacity(spans.len() + num_nodes as usize);
    let mut nodes = Vec::with_capacity(num_nodes as usize);
    let mut pending = spans.into_iter();
    let mut carry: Option<Span> = None;
    let mut so_far = 0u64;

    for node in 0..num_nodes {
        let node_end = canonical_node_bounds(total, num_nodes, node).end;
        let first = out.len();

        while so_far < node_end {
            let Some(span) = carry.take().or_else(|| pending.next()) else {
                break;
            };
            if so_far + span.len() > node_end {
                let split = span.begin + (node_end - so_far);
                out.push(Span::new(span.begin, split));
                carry = Some(Span::new(split, span.end));
                so_far = node_end;
            } else {
                so_far += span.len();
                out.push(span);
            }
        }

        nodes.push(first..out.len());
    }

    NodeSpans {
        spans: out,
        nodes,
        total,
    }
}
