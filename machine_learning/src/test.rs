#![cfg(test)]

use std::num::NonZeroUsize;

use ndarray::{Axis, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::batching::{
    Minibatch, SplitPoints, SubBatch, materialize, normalized_weights, split_for_capacity,
    split_into_n,
};

fn random_minibatch(rng: &mut StdRng) -> Minibatch {
    let examples = rng.random_range(1..40);
    let sentence = |rng: &mut StdRng| {
        let len = rng.random_range(1..25);
        (0..len).map(|_| rng.random_range(1..1000)).collect::<Vec<u32>>()
    };

    let sources: Vec<_> = (0..examples).map(|_| sentence(rng)).collect();
    let targets: Vec<_> = (0..examples).map(|_| sentence(rng)).collect();
    Minibatch::from_sequences(&sources, &targets).unwrap()
}

fn random_points(rng: &mut StdRng, mb: &Minibatch) -> SplitPoints {
    let source = mb.source_lengths();
    let target = mb.target_lengths();

    match rng.random_range(0..3) {
        0 => {
            let n = NonZeroUsize::new(rng.random_range(1..10)).unwrap();
            split_into_n(&source, &target, n).unwrap()
        }
        1 => split_for_capacity(&source, &target, rng.random_range(1..10), 0).unwrap(),
        _ => split_for_capacity(&source, &target, 0, rng.random_range(1..120)).unwrap(),
    }
}

/// Checks that the real tokens of `sub_batch`'s `j`-th example are the same as
/// the ones of the minibatch's `i`-th example.
fn assert_same_example(mb: &Minibatch, i: usize, sub_batch: &SubBatch, j: usize) {
    let source_len = mb.source_lengths()[i];
    let target_len = mb.target_lengths()[i];

    assert_eq!(sub_batch.source_lengths()[j], source_len);
    assert_eq!(sub_batch.target_lengths()[j], target_len);
    assert_eq!(
        sub_batch.source().slice(s![.., ..source_len, j]),
        mb.source().slice(s![.., ..source_len, i])
    );
    assert_eq!(
        sub_batch.target().slice(s![..target_len, j]),
        mb.target().slice(s![..target_len, i])
    );
}

#[test]
fn real_sub_batches_reproduce_the_minibatch() {
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..200 {
        let mb = random_minibatch(&mut rng);
        let points = random_points(&mut rng, &mb);
        let workers = NonZeroUsize::new(rng.random_range(1..6)).unwrap();
        let sub_batches = materialize(&mb, &points, workers);

        let mut next = 0;
        for sub_batch in sub_batches.iter().filter(|sb| !sb.is_dummy()) {
            assert_eq!(sub_batch.examples().start, next);

            for (j, i) in sub_batch.examples().enumerate() {
                assert_same_example(&mb, i, sub_batch, j);
            }

            next = sub_batch.examples().end;
        }

        assert_eq!(next, mb.examples());
    }
}

#[test]
fn sub_batch_count_is_a_multiple_of_the_workers() {
    let mut rng = StdRng::seed_from_u64(3);

    for _ in 0..200 {
        let mb = random_minibatch(&mut rng);
        let points = random_points(&mut rng, &mb);
        let workers = rng.random_range(1..9);
        let sub_batches = materialize(&mb, &points, NonZeroUsize::new(workers).unwrap());

        assert_eq!(sub_batches.len() % workers, 0);
        assert!(sub_batches.len() - points.len() < workers);
    }
}

#[test]
fn normalized_weights_add_up_to_one() {
    let mut rng = StdRng::seed_from_u64(5);

    for _ in 0..200 {
        let mb = random_minibatch(&mut rng);
        let points = random_points(&mut rng, &mb);
        let workers = NonZeroUsize::new(rng.random_range(1..6)).unwrap();
        let sub_batches = materialize(&mb, &points, workers);
        let weights = normalized_weights(&sub_batches).unwrap();

        let total: f32 = weights.iter().sum();
        assert!((total - 1.).abs() < 1e-5, "weights add up to {total}");

        for (sub_batch, weight) in sub_batches.iter().zip(&weights) {
            assert!(*weight >= 0.);
            if sub_batch.is_dummy() {
                assert_eq!(*weight, 0.);
            }
        }
    }
}

#[test]
fn trimming_keeps_every_real_token() {
    let mut rng = StdRng::seed_from_u64(9);

    for _ in 0..100 {
        let mb = random_minibatch(&mut rng);
        let points = random_points(&mut rng, &mb);
        let sub_batches = materialize(&mb, &points, NonZeroUsize::MIN);

        let real_tokens: f32 = mb.source_mask().sum() + mb.target_mask().sum();
        let kept: f32 = sub_batches.iter().map(|sb| sb.weight()).sum();
        assert_eq!(real_tokens, kept);

        for sub_batch in &sub_batches {
            let longest = sub_batch.source_lengths().into_iter().max().unwrap();
            assert_eq!(sub_batch.source().len_of(Axis(1)), longest);
        }
    }
}
