// ordering-core/src/stream/weights.rs

//! Stream weighting.
//!
//! Streams are weighted either relatively (every stream sets `proportion`) or
//! absolutely (each stream sets `repeat`, `choose`, or nothing, meaning 1:1).
//! Mixing the two schemes is an error. Either way, weights are resolved once
//! into an exact integer `choose` per stream whose sum is the epoch size.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::Stream;
use crate::error::{OrderError, Result};

/// Checks that streams do not mix relative and absolute weights.
///
/// Returns `true` if every stream is weighted by `proportion`.
pub fn cross_check_weights(streams: &[Stream]) -> Result<bool> {
    let num_relative = streams
        .iter()
        .filter(|s| s.configured_proportion().is_some())
        .count();

    if num_relative == 0 {
        Ok(false)
    } else if num_relative == streams.len() {
        Ok(true)
    } else {
        Err(OrderError::config(
            "attempted to mix absolute (`repeat`, `choose`, or no weight) and relative \
             (`proportion`) stream weighting schemes; they must be all one or the other",
        ))
    }
}

/// Resolves every stream's per-epoch `choose` and returns the epoch size.
///
/// Streams must already know their sample counts. For relative weights,
/// `epoch_size` defaults to the total number of underlying samples. For
/// absolute weights, the epoch size is the sum of the chooses and a
/// different pre-specified `epoch_size` is an error.
pub fn derive_sampling(
    streams: &mut [Stream],
    relative: bool,
    seed: u64,
    epoch_size: Option<u64>,
) -> Result<u64> {
    let epoch_size = if relative {
        derive_relatively(streams, seed, epoch_size)?
    } else {
        derive_absolutely(streams, epoch_size)?
    };

    for stream in streams.iter() {
        if stream.choose() > 0 && stream.num_samples() == 0 {
            return Err(OrderError::stream(
                stream.name(),
                format!("cannot choose {} samples from an empty stream", stream.choose()),
            ));
        }
        debug!(
            stream = stream.name(),
            choose = stream.choose(),
            repeat = stream.repeat(),
            proportion = stream.proportion(),
            "Resolved stream weight"
        );
    }

    if epoch_size == 0 {
        return Err(OrderError::config("streams resolve to an empty epoch"));
    }

    Ok(epoch_size)
}

fn derive_relatively(streams: &mut [Stream], seed: u64, epoch_size: Option<u64>) -> Result<u64> {
    let total_proportion: f64 = streams
        .iter()
        .filter_map(Stream::configured_proportion)
        .sum();
    if !(total_proportion > 0.0) {
        return Err(OrderError::config(
            "stream proportions must sum to a positive number",
        ));
    }

    let epoch_size =
        epoch_size.unwrap_or_else(|| streams.iter().map(Stream::num_samples).sum());

    let proportions: Vec<f64> = streams
        .iter()
        .map(|s| s.configured_proportion().unwrap_or(0.0) / total_proportion)
        .collect();
    let mut chooses: Vec<u64> = proportions
        .iter()
        .map(|p| (epoch_size as f64 * p).floor() as u64)
        .collect();

    // Rounding down leaves a shortfall of at most one per weighted stream;
    // hand it out to a seed-determined subset of them. Zero-weight streams
    // never draw.
    let mut stream_ids: Vec<usize> = (0..streams.len())
        .filter(|&id| proportions[id] > 0.0)
        .collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    stream_ids.shuffle(&mut rng);

    let mut sum: u64 = chooses.iter().sum();
    let mut cursor = stream_ids.iter().cycle();
    while sum < epoch_size {
        if let Some(&id) = cursor.next() {
            chooses[id] += 1;
            sum += 1;
        }
    }
    while sum > epoch_size {
        if let Some(&id) = cursor.next() {
            if chooses[id] > 0 {
                chooses[id] -= 1;
                sum -= 1;
            }
        }
    }

    for ((stream, proportion), choose) in streams.iter_mut().zip(proportions).zip(chooses) {
        let repeat = if stream.num_samples() > 0 {
            choose as f64 / stream.num_samples() as f64
        } else {
            0.0
        };
        stream.set_resolved(proportion, repeat, choose);
    }

    Ok(epoch_size)
}

fn derive_absolutely(streams: &mut [Stream], epoch_size: Option<u64>) -> Result<u64> {
    let chooses: Vec<u64> = streams
        .iter()
        .map(|s| match (s.configured_repeat(), s.configured_choose()) {
            (Some(repeat), _) => (repeat * s.num_samples() as f64).floor() as u64,
            (None, Some(choose)) => choose,
            (None, None) => s.num_samples(),
        })
        .collect();

    let total: u64 = chooses.iter().sum();
    if let Some(expected) = epoch_size {
        if expected != total {
            return Err(OrderError::config(format!(
                "`epoch_size` ({expected}) conflicts with the absolute stream weights, which \
                 sum to {total} samples per epoch; drop one of them"
            )));
        }
    }

    for (stream, choose) in streams.iter_mut().zip(chooses) {
        let proportion = if total > 0 {
            choose as f64 / total as f64
        } else {
            0.0
        };
        let repeat = if stream.num_samples() > 0 {
            choose as f64 / stream.num_samples() as f64
        } else {
            0.0
        };
        stream.set_resolved(proportion, repeat, choose);
    }

    Ok(total)
}
