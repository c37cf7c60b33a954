use std::{num::NonZeroUsize, ops::Range};

use log::debug;
use ndarray::{Array2, Array3, Axis, s};

use super::{Minibatch, SplitPoints, minibatch::lengths};
use crate::error::{MlErr, Result};

/// A contiguous slice of a minibatch, assigned to one worker for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct SubBatch {
    source: Array3<u32>,
    source_mask: Array2<f32>,
    target: Array2<u32>,
    target_mask: Array2<f32>,
    examples: Range<usize>,
    weight: f32,
    is_dummy: bool,
}

impl SubBatch {
    pub fn source(&self) -> &Array3<u32> {
        &self.source
    }

    pub fn source_mask(&self) -> &Array2<f32> {
        &self.source_mask
    }

    pub fn target(&self) -> &Array2<u32> {
        &self.target
    }

    pub fn target_mask(&self) -> &Array2<f32> {
        &self.target_mask
    }

    /// The range of minibatch examples this sub-batch was sliced from.
    pub fn examples(&self) -> Range<usize> {
        self.examples.clone()
    }

    /// The amount of examples in the sub-batch.
    pub fn len(&self) -> usize {
        self.source_mask.len_of(Axis(1))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The unnormalized weight, that is, the amount of real tokens. Always `0`
    /// for dummies.
    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn is_dummy(&self) -> bool {
        self.is_dummy
    }

    /// Returns the amount of real source tokens of every example.
    pub fn source_lengths(&self) -> Vec<usize> {
        lengths(self.source_mask.view())
    }

    /// Returns the amount of real target tokens of every example.
    pub fn target_lengths(&self) -> Vec<usize> {
        lengths(self.target_mask.view())
    }

    /// Returns the amount of real target tokens in the sub-batch.
    pub fn target_tokens(&self) -> usize {
        self.target_lengths().into_iter().sum()
    }

    /// Creates a zero weight single example copy of this sub-batch's last example.
    fn dummy(&self) -> Self {
        let last = self.len() - 1;

        Self {
            source: self.source.slice(s![.., .., last..]).to_owned(),
            source_mask: self.source_mask.slice(s![.., last..]).to_owned(),
            target: self.target.slice(s![.., last..]).to_owned(),
            target_mask: self.target_mask.slice(s![.., last..]).to_owned(),
            examples: self.examples.end - 1..self.examples.end,
            weight: 0.,
            is_dummy: true,
        }
    }
}

/// Slices `minibatch` along the example axis at the given split points, the
/// last sub-batch extends to the end of the minibatch.
///
/// The returned sub-batches are neither trimmed nor weighted.
pub fn split(minibatch: &Minibatch, split_points: &SplitPoints) -> Vec<SubBatch> {
    split_points
        .bins(minibatch.examples())
        .map(|bin| SubBatch {
            source: minibatch
                .source()
                .slice(s![.., .., bin.clone()])
                .to_owned(),
            source_mask: minibatch.source_mask().slice(s![.., bin.clone()]).to_owned(),
            target: minibatch.target().slice(s![.., bin.clone()]).to_owned(),
            target_mask: minibatch.target_mask().slice(s![.., bin.clone()]).to_owned(),
            examples: bin,
            weight: 0.,
            is_dummy: false,
        })
        .collect()
}

/// Shrinks the sequence axis of the source and the target, independently, to
/// the longest real sentence of the sub-batch.
pub fn trim(sub_batch: &mut SubBatch) {
    let source_len = sub_batch.source_lengths().into_iter().max().unwrap_or(0);
    let target_len = sub_batch.target_lengths().into_iter().max().unwrap_or(0);

    sub_batch.source = sub_batch.source.slice(s![.., ..source_len, ..]).to_owned();
    sub_batch.source_mask = sub_batch.source_mask.slice(s![..source_len, ..]).to_owned();
    sub_batch.target = sub_batch.target.slice(s![..target_len, ..]).to_owned();
    sub_batch.target_mask = sub_batch.target_mask.slice(s![..target_len, ..]).to_owned();
}

/// Computes the unnormalized weight of a sub-batch: the total amount of real
/// source and target tokens.
pub fn weight(sub_batch: &SubBatch) -> f32 {
    if sub_batch.is_dummy {
        return 0.;
    }

    sub_batch.source_mask.sum() + sub_batch.target_mask.sum()
}

/// Appends zero weight dummies until the amount of sub-batches is a multiple of
/// `worker_count`. Every dummy is a copy of the first sub-batch's last example.
///
/// # Returns
/// The amount of dummies appended.
pub fn pad_to_multiple(sub_batches: &mut Vec<SubBatch>, worker_count: NonZeroUsize) -> usize {
    let remainder = sub_batches.len() % worker_count.get();
    if remainder == 0 {
        return 0;
    }

    let padding = worker_count.get() - remainder;
    let dummy = sub_batches[0].dummy();
    sub_batches.extend(std::iter::repeat_n(dummy, padding));
    padding
}

/// Splits, trims, weights and pads a minibatch, ready to be dispatched in rounds
/// of `worker_count` sub-batches.
///
/// # Arguments
/// * `minibatch` - The minibatch to split.
/// * `split_points` - Where each sub-batch starts.
/// * `worker_count` - The amount of workers per round.
///
/// # Returns
/// The sub-batches, their amount being a multiple of `worker_count`.
pub fn materialize(
    minibatch: &Minibatch,
    split_points: &SplitPoints,
    worker_count: NonZeroUsize,
) -> Vec<SubBatch> {
    let mut sub_batches = split(minibatch, split_points);

    for sub_batch in sub_batches.iter_mut() {
        trim(sub_batch);
        sub_batch.weight = weight(sub_batch);
    }

    let padding = pad_to_multiple(&mut sub_batches, worker_count);
    debug!(
        sub_batches = sub_batches.len(),
        padding = padding,
        workers = worker_count.get();
        "materialized minibatch"
    );

    sub_batches
}

/// Normalizes the sub-batch weights so that they add up to one, dummies keep
/// a weight of zero.
///
/// # Returns
/// The normalized weights or an error if the weights add up to zero.
pub fn normalized_weights(sub_batches: &[SubBatch]) -> Result<Vec<f32>> {
    let total: f64 = sub_batches.iter().map(|sb| sb.weight as f64).sum();

    if total == 0. {
        return Err(MlErr::ZeroTotalWeight);
    }

    let weights = sub_batches
        .iter()
        .map(|sb| (sb.weight as f64 / total) as f32)
        .collect();

    Ok(weights)
}
