// ordering-core/src/tensor.rs

//! Flat, row-major storage for the 5-D sample ID layout.

use crate::error::{OrderError, Result};

/// Marks a padding slot that holds no sample.
pub const NO_SAMPLE: i64 = -1;

/// Sample IDs laid out as (physical node, rank, worker, batch, position in batch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTensor {
    shape: [usize; 5],
    ids: Vec<i64>,
}

impl SampleTensor {
    /// Wraps a flat buffer. Its length must equal the product of `shape`.
    pub fn from_vec(shape: [usize; 5], ids: Vec<i64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if ids.len() != expected {
            return Err(OrderError::topology(format!(
                "tensor of shape {shape:?} needs {expected} ids, got {}",
                ids.len()
            )));
        }
        Ok(Self { shape, ids })
    }

    pub fn shape(&self) -> [usize; 5] {
        self.shape
    }

    pub fn num_nodes(&self) -> usize {
        self.shape[0]
    }

    pub fn ranks_per_node(&self) -> usize {
        self.shape[1]
    }

    pub fn workers_per_rank(&self) -> usize {
        self.shape[2]
    }

    pub fn batches_per_worker(&self) -> usize {
        self.shape[3]
    }

    pub fn batch_size(&self) -> usize {
        self.shape[4]
    }

    /// Returns the ID at a 5-D index, or `None` if any coordinate is out of bounds.
    pub fn get(&self, index: [usize; 5]) -> Option<i64> {
        if index.iter().zip(self.shape.iter()).any(|(i, n)| i >= n) {
            return None;
        }
        let flat = index
            .iter()
            .zip(self.shape.iter())
            .fold(0usize, |acc, (i, n)| acc * n + i);
        Some(self.ids[flat])
    }

    /// All IDs one worker iterates, batch by batch.
    pub fn worker_ids(&self, node: usize, rank: usize, worker: usize) -> &[i64] {
        let [_, ranks, workers, batches, batch_size] = self.shape;
        let len = batches * batch_size;
        let begin = ((node * ranks + rank) * workers + worker) * len;
        &self.ids[begin..begin + len]
    }

    /// Number of slots holding a sample.
    pub fn num_samples(&self) -> usize {
        self.ids.iter().filter(|&&id| id != NO_SAMPLE).count()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.ids
    }

    pub fn into_vec(self) -> Vec<i64> {
        self.ids
    }

    /// Replaces every non-padding ID with `mapping[id]`.
    ///
    /// Padding slots are left untouched.
    pub fn remap(&mut self, mapping: &[i64]) -> Result<()> {
        for id in self.ids.iter_mut().filter(|id| **id != NO_SAMPLE) {
            let from = *id;
            *id = usize::try_from(from)
                .ok()
                .and_then(|index| mapping.get(index).copied())
                .ok_or_else(|| {
                    OrderError::stage(
                        "map",
                        format!("sample id {from} outside mapping of {} entries", mapping.len()),
                    )
                })?;
        }
        Ok(())
    }
}
