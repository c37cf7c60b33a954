use std::{num::NonZeroUsize, ops::Range};

use crate::error::{MlErr, Result};

/// The starting example index of every sub-batch of a minibatch.
///
/// Always starts with `0` and is strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPoints(Vec<usize>);

impl SplitPoints {
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the example ranges delimited by the split points, the last one
    /// extending up to `examples`.
    ///
    /// # Arguments
    /// * `examples` - The amount of examples in the split minibatch.
    pub fn bins(&self, examples: usize) -> impl Iterator<Item = Range<usize>> + '_ {
        let ends = self.0.iter().skip(1).copied().chain([examples]);
        self.0.iter().copied().zip(ends).map(|(start, end)| start..end)
    }
}

/// The per-worker capacity a sub-batch must fit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// At most this many examples per sub-batch.
    Examples(NonZeroUsize),
    /// At most this many padded source (and target) tokens per sub-batch.
    Tokens(NonZeroUsize),
}

impl Capacity {
    /// Resolves the two mutually exclusive capacity limits, `0` meaning unset.
    ///
    /// # Returns
    /// `None` if neither limit is set, or an error if both are.
    pub fn from_limits(max_examples: usize, max_tokens: usize) -> Result<Option<Self>> {
        match (NonZeroUsize::new(max_examples), NonZeroUsize::new(max_tokens)) {
            (Some(_), Some(_)) => Err(MlErr::CapacityLimits {
                max_examples,
                max_tokens,
            }),
            (Some(n), None) => Ok(Some(Self::Examples(n))),
            (None, Some(n)) => Ok(Some(Self::Tokens(n))),
            (None, None) => Ok(None),
        }
    }
}

/// Determines how to split a minibatch into (at most) `n` sub-batches of roughly
/// equal size, where size is the amount of padded source + target tokens.
///
/// A sub-batch may be over-filled, but only by one example's worth of tokens.
///
/// # Arguments
/// * `source_lengths` - The source length of every example.
/// * `target_lengths` - The target length of every example.
/// * `n` - The desired amount of sub-batches.
///
/// # Returns
/// The split points, or an error if the lengths are empty or disagree in size.
pub fn split_into_n(
    source_lengths: &[usize],
    target_lengths: &[usize],
    n: NonZeroUsize,
) -> Result<SplitPoints> {
    let examples = check_lengths(source_lengths, target_lengths)?;

    let s_total = source_lengths.iter().max().copied().unwrap_or(0) * examples;
    let t_total = target_lengths.iter().max().copied().unwrap_or(0) * examples;
    let soft_limit = (s_total + t_total).div_ceil(n.get());

    let points = greedy_scan(source_lengths, target_lengths, true, |s_tokens, t_tokens| {
        s_tokens + t_tokens > soft_limit
    });

    debug_assert!(points.len() <= n.get());
    Ok(SplitPoints(points))
}

/// Determines how to split a minibatch into sub-batches that fit the per-worker
/// capacity. Exactly one of the limits must be non zero.
///
/// # Arguments
/// * `source_lengths` - The source length of every example.
/// * `target_lengths` - The target length of every example.
/// * `max_examples_per_worker` - The example limit, `0` if unset.
/// * `max_tokens_per_worker` - The token limit, `0` if unset.
///
/// # Returns
/// The split points, or an error if the limits are misconfigured or the lengths
/// are invalid.
pub fn split_for_capacity(
    source_lengths: &[usize],
    target_lengths: &[usize],
    max_examples_per_worker: usize,
    max_tokens_per_worker: usize,
) -> Result<SplitPoints> {
    let capacity = Capacity::from_limits(max_examples_per_worker, max_tokens_per_worker)?.ok_or(
        MlErr::CapacityLimits {
            max_examples: max_examples_per_worker,
            max_tokens: max_tokens_per_worker,
        },
    )?;

    split_to_capacity(source_lengths, target_lengths, capacity)
}

/// Same as `split_for_capacity` with an already resolved `Capacity`.
///
/// With a token capacity a sub-batch is closed *before* the example that would
/// overflow it, an example that alone exceeds the limit still gets its own
/// sub-batch.
pub fn split_to_capacity(
    source_lengths: &[usize],
    target_lengths: &[usize],
    capacity: Capacity,
) -> Result<SplitPoints> {
    let examples = check_lengths(source_lengths, target_lengths)?;

    let points = match capacity {
        Capacity::Examples(max) => (0..examples).step_by(max.get()).collect(),
        Capacity::Tokens(max) => {
            let max = max.get();
            greedy_scan(source_lengths, target_lengths, false, |s_tokens, t_tokens| {
                s_tokens > max || t_tokens > max
            })
        }
    };

    Ok(SplitPoints(points))
}

fn check_lengths(source_lengths: &[usize], target_lengths: &[usize]) -> Result<usize> {
    if source_lengths.len() != target_lengths.len() {
        return Err(MlErr::SizeMismatch {
            a: "target lengths",
            b: "source lengths",
            got: target_lengths.len(),
            expected: source_lengths.len(),
        });
    }

    if source_lengths.is_empty() {
        return Err(MlErr::EmptyMinibatch);
    }

    Ok(source_lengths.len())
}

/// Scans the examples left to right, growing the open sub-batch until `exceeds`
/// reports that its padded token counts went over the limit.
///
/// If `overfill` is set the triggering example stays in the closing sub-batch,
/// otherwise it starts the next one.
fn greedy_scan<F>(
    source_lengths: &[usize],
    target_lengths: &[usize],
    overfill: bool,
    exceeds: F,
) -> Vec<usize>
where
    F: Fn(usize, usize) -> bool,
{
    let examples = source_lengths.len();
    let mut points = vec![0];

    loop {
        let start = points[points.len() - 1];
        let mut s_longest = source_lengths[start];
        let mut t_longest = target_lengths[start];
        let mut next = None;

        for j in start + 1..examples {
            s_longest = s_longest.max(source_lengths[j]);
            t_longest = t_longest.max(target_lengths[j]);
            let size = j - start + 1;

            if exceeds(s_longest * size, t_longest * size) {
                next = Some(if overfill { j + 1 } else { j });
                break;
            }
        }

        match next {
            Some(next) if next < examples => points.push(next),
            _ => break,
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn random_lengths(rng: &mut StdRng, examples: usize) -> (Vec<usize>, Vec<usize>) {
        let source = (0..examples).map(|_| rng.random_range(1..40)).collect();
        let target = (0..examples).map(|_| rng.random_range(1..40)).collect();
        (source, target)
    }

    fn assert_well_formed(points: &SplitPoints, examples: usize) {
        assert_eq!(points.as_slice()[0], 0);
        assert!(points.as_slice().windows(2).all(|w| w[0] < w[1]));
        assert!(*points.as_slice().last().unwrap() < examples);
    }

    #[test]
    fn fixed_split_overfills_by_one_example() {
        let points = split_into_n(&[3, 5, 2, 4], &[2, 3, 1, 2], nz(2)).unwrap();
        assert_eq!(points.as_slice(), &[0, 3]);

        let bins: Vec<_> = points.bins(4).collect();
        assert_eq!(bins, [0..3, 3..4]);
    }

    #[test]
    fn fixed_split_into_one_keeps_the_whole_minibatch() {
        let points = split_into_n(&[7, 1, 9], &[3, 3, 3], nz(1)).unwrap();
        assert_eq!(points.as_slice(), &[0]);
    }

    #[test]
    fn fixed_split_of_uniform_lengths_overfills_every_bin() {
        // soft limit is 8 tokens, every closed bin takes a third example.
        let points = split_into_n(&[2; 8], &[2; 8], nz(4)).unwrap();
        assert_eq!(points.as_slice(), &[0, 3, 6]);
    }

    #[test]
    fn fixed_split_never_exceeds_n() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let examples = rng.random_range(1..60);
            let n = rng.random_range(1..12);
            let (source, target) = random_lengths(&mut rng, examples);

            let points = split_into_n(&source, &target, nz(n)).unwrap();
            assert!(points.len() <= n);
            assert_well_formed(&points, examples);
        }
    }

    #[test]
    fn token_capacity_splits_into_singletons() {
        let points = split_for_capacity(&[10, 10, 10], &[1, 1, 1], 0, 15).unwrap();
        assert_eq!(points.as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn token_capacity_checks_target_too() {
        let points = split_for_capacity(&[1, 1, 1, 1], &[3, 3, 9, 1], 0, 9).unwrap();
        assert_eq!(points.as_slice(), &[0, 2, 3]);
    }

    #[test]
    fn oversized_example_gets_its_own_sub_batch() {
        let points = split_for_capacity(&[2, 50, 2, 2], &[2, 2, 2, 2], 0, 8).unwrap();
        assert_eq!(points.as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn token_capacity_is_respected_by_multi_example_bins() {
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..500 {
            let examples = rng.random_range(1..60);
            let max_tokens = rng.random_range(1..200);
            let (source, target) = random_lengths(&mut rng, examples);

            let points = split_for_capacity(&source, &target, 0, max_tokens).unwrap();
            assert_well_formed(&points, examples);

            for bin in points.bins(examples).filter(|bin| bin.len() > 1) {
                let s = source[bin.clone()].iter().max().unwrap() * bin.len();
                let t = target[bin.clone()].iter().max().unwrap() * bin.len();
                assert!(s <= max_tokens && t <= max_tokens);
            }
        }
    }

    #[test]
    fn example_capacity_makes_fixed_chunks() {
        let points = split_for_capacity(&[1; 7], &[1; 7], 3, 0).unwrap();
        assert_eq!(points.as_slice(), &[0, 3, 6]);

        let bins: Vec<_> = points.bins(7).collect();
        assert_eq!(bins, [0..3, 3..6, 6..7]);
    }

    #[test]
    fn capacity_limits_must_be_exclusive() {
        let both = split_for_capacity(&[1], &[1], 2, 2).unwrap_err();
        assert!(matches!(both, MlErr::CapacityLimits { .. }));

        let neither = split_for_capacity(&[1], &[1], 0, 0).unwrap_err();
        assert!(matches!(neither, MlErr::CapacityLimits { .. }));
    }

    #[test]
    fn mismatched_lengths_fail() {
        let err = split_into_n(&[1, 2], &[1], nz(1)).unwrap_err();
        assert!(matches!(err, MlErr::SizeMismatch { .. }));

        let err = split_into_n(&[], &[], nz(1)).unwrap_err();
        assert_eq!(err, MlErr::EmptyMinibatch);
    }
}
