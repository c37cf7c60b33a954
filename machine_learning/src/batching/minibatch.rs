use ndarray::{Array2, Array3, ArrayView2, Axis};

use crate::error::{MlErr, Result};

/// A batch of source/target sentence pairs.
///
/// Arrays are laid out as `(seq_len, batch)`, the source tokens carry an extra
/// leading factor axis: `(factors, seq_len, batch)`. Masks hold `1.` for real
/// tokens and `0.` for padding, every example's mask is a run of 1s followed by
/// 0s.
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    source: Array3<u32>,
    source_mask: Array2<f32>,
    target: Array2<u32>,
    target_mask: Array2<f32>,
}

impl Minibatch {
    /// Creates a new `Minibatch`.
    ///
    /// # Arguments
    /// * `source` - The source tokens, shaped `(factors, seq_len, batch)`.
    /// * `source_mask` - The source validity mask, shaped `(seq_len, batch)`.
    /// * `target` - The target tokens, shaped `(seq_len, batch)`.
    /// * `target_mask` - The target validity mask, shaped `(seq_len, batch)`.
    ///
    /// # Returns
    /// A new `Minibatch` or an error if the batch is empty, the shapes disagree
    /// or a mask isn't a prefix of 1s.
    pub fn new(
        source: Array3<u32>,
        source_mask: Array2<f32>,
        target: Array2<u32>,
        target_mask: Array2<f32>,
    ) -> Result<Self> {
        let examples = source_mask.len_of(Axis(1));
        if examples == 0 {
            return Err(MlErr::EmptyMinibatch);
        }

        check_size("source", "source mask", source.len_of(Axis(2)), examples)?;
        check_size("target", "source mask", target.len_of(Axis(1)), examples)?;
        check_size("target mask", "source mask", target_mask.len_of(Axis(1)), examples)?;
        check_size(
            "source",
            "source mask",
            source.len_of(Axis(1)),
            source_mask.len_of(Axis(0)),
        )?;
        check_size(
            "target",
            "target mask",
            target.len_of(Axis(0)),
            target_mask.len_of(Axis(0)),
        )?;

        if source.len_of(Axis(0)) == 0 {
            return Err(MlErr::SizeMismatch {
                a: "source factors",
                b: "one factor",
                got: 0,
                expected: 1,
            });
        }

        check_mask(source_mask.view(), "source")?;
        check_mask(target_mask.view(), "target")?;

        Ok(Self {
            source,
            source_mask,
            target,
            target_mask,
        })
    }

    /// Creates a single factor `Minibatch` from ragged token sequences, padding
    /// every sequence with `0` up to the longest one.
    ///
    /// # Arguments
    /// * `sources` - The source sentences.
    /// * `targets` - The target sentences.
    ///
    /// # Returns
    /// A new `Minibatch` or an error if there are no sentences or the amount of
    /// sources and targets differs.
    pub fn from_sequences(sources: &[Vec<u32>], targets: &[Vec<u32>]) -> Result<Self> {
        check_size("sources", "targets", sources.len(), targets.len())?;

        let (source, source_mask) = pad_sequences(sources);
        let (target, target_mask) = pad_sequences(targets);
        let source = source.insert_axis(Axis(0));

        Self::new(source, source_mask, target, target_mask)
    }

    /// Returns the amount of examples in the minibatch.
    pub fn examples(&self) -> usize {
        self.source_mask.len_of(Axis(1))
    }

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

    /// Returns the amount of real source tokens of every example.
    pub fn source_lengths(&self) -> Vec<usize> {
        lengths(self.source_mask.view())
    }

    /// Returns the amount of real target tokens of every example.
    pub fn target_lengths(&self) -> Vec<usize> {
        lengths(self.target_mask.view())
    }
}

/// Counts the 1s of every example (column) in `mask`.
pub(crate) fn lengths(mask: ArrayView2<f32>) -> Vec<usize> {
    mask.axis_iter(Axis(1))
        .map(|column| column.iter().filter(|&&m| m == 1.).count())
        .collect()
}

fn check_size(a: &'static str, b: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            a,
            b,
            got,
            expected,
        });
    }

    Ok(())
}

fn check_mask(mask: ArrayView2<f32>, which: &'static str) -> Result<()> {
    for (example, column) in mask.axis_iter(Axis(1)).enumerate() {
        let mut padding = false;

        for &m in column.iter() {
            if m == 0. {
                padding = true;
            } else if m != 1. || padding {
                return Err(MlErr::InvalidMask { which, example });
            }
        }
    }

    Ok(())
}

fn pad_sequences(sequences: &[Vec<u32>]) -> (Array2<u32>, Array2<f32>) {
    let seq_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut tokens = Array2::zeros((seq_len, sequences.len()));
    let mut mask = Array2::zeros((seq_len, sequences.len()));

    for (j, sequence) in sequences.iter().enumerate() {
        for (i, &token) in sequence.iter().enumerate() {
            tokens[[i, j]] = token;
            mask[[i, j]] = 1.;
        }
    }

    (tokens, mask)
}
