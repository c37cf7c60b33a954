use std::fmt::{self, Display};

use log::debug;
use machine_learning::{
    MlErr,
    params::{Evaluation, GradientMap, ParamArena, ParamGrad},
};
use ndarray::{ArrayD, Zip};
use rayon::prelude::*;

use crate::storage::{Result, StorageErr, Store};

/// Where the accumulator stands in its `reset → accumulate* → apply → reset` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Freshly reset, nothing accumulated yet.
    Clean,
    /// At least one round has been accumulated.
    Accumulating,
    /// The accumulated update was handed to the store, waiting for a reset.
    Applied,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Clean => "clean",
            Phase::Accumulating => "accumulating",
            Phase::Applied => "applied",
        };

        f.write_str(phase)
    }
}

/// The outcome of applying an accumulated update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    /// The global step after the update.
    pub global_step: u64,
    /// The accumulated (weighted) loss.
    pub loss: f32,
    /// The joint L2 norm of the accumulated gradient, before clipping.
    pub grad_norm: f32,
}

/// Sums weighted losses and gradients over one or more rounds until they are
/// applied as a single update.
#[derive(Debug, Clone)]
pub struct GradientAccumulator {
    loss: f32,
    grads: Vec<ArrayD<f32>>,
    contributed: Vec<bool>,
    rounds: usize,
    clip_norm: f32,
    phase: Phase,
}

impl GradientAccumulator {
    /// Creates a new `GradientAccumulator`, zeroed and ready for a cycle.
    ///
    /// # Arguments
    /// * `params` - The parameters the gradients belong to.
    /// * `clip_norm` - The global norm threshold, `0` disables clipping.
    pub fn new(params: &ParamArena, clip_norm: f32) -> Self {
        Self {
            loss: 0.,
            grads: params.zeros_like(),
            contributed: vec![false; params.len()],
            rounds: 0,
            clip_norm,
            phase: Phase::Clean,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The loss accumulated so far in this cycle.
    pub fn loss(&self) -> f32 {
        self.loss
    }

    /// The amount of rounds accumulated so far in this cycle.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Returns the gradient accumulated so far for every slot, `NotApplicable`
    /// for the slots no evaluation has contributed to.
    pub fn gradients(&self) -> GradientMap {
        let grads = self
            .grads
            .iter()
            .zip(&self.contributed)
            .map(|(grad, &contributed)| {
                if contributed {
                    ParamGrad::Contributed(grad.clone())
                } else {
                    ParamGrad::NotApplicable
                }
            })
            .collect();

        GradientMap::from_grads(grads)
    }

    /// Adds one round of evaluations into the accumulated state.
    ///
    /// The round's loss is `Σ weight_i * loss_i`, and the round's gradient for
    /// every slot is `Σ weight_i * grad_i` over the evaluations that contributed
    /// to it. A slot no evaluation contributed to is left as is.
    ///
    /// The round is checked before anything is added, so a failing call leaves
    /// the state untouched.
    ///
    /// # Arguments
    /// * `evaluations` - One evaluation per worker.
    /// * `weights` - The normalized weight of every evaluated sub-batch.
    ///
    /// # Returns
    /// An error if the update was already applied or the round doesn't match
    /// the parameters.
    pub fn accumulate(&mut self, evaluations: &[Evaluation], weights: &[f32]) -> Result<()> {
        if self.phase == Phase::Applied {
            return Err(StorageErr::OutOfOrder {
                op: "accumulate",
                phase: self.phase,
            });
        }

        self.check_round(evaluations, weights)?;

        let round_loss: f32 = evaluations
            .iter()
            .zip(weights)
            .map(|(eval, w)| w * eval.loss)
            .sum();

        self.grads
            .par_iter_mut()
            .zip(self.contributed.par_iter_mut())
            .enumerate()
            .for_each(|(slot, (acc, contributed))| {
                for (eval, &w) in evaluations.iter().zip(weights) {
                    if let ParamGrad::Contributed(grad) = &eval.grads.as_slice()[slot] {
                        Zip::from(&mut *acc).and(grad).for_each(|a, &g| *a += w * g);
                        *contributed = true;
                    }
                }
            });

        self.loss += round_loss;
        self.rounds += 1;
        self.phase = Phase::Accumulating;
        debug!(round = self.rounds, round_loss = round_loss; "accumulated round");

        Ok(())
    }

    /// Clips the accumulated gradient by its global norm and hands it to `store`.
    ///
    /// # Arguments
    /// * `store` - The receiving end of the update.
    /// * `global_step` - The global step before this update.
    ///
    /// # Returns
    /// The new global step, the accumulated loss and the pre-clip gradient norm,
    /// or an error if nothing was accumulated, the update was already applied or
    /// the store rejects it.
    pub fn apply<S: Store>(&mut self, store: &S, global_step: u64) -> Result<Applied> {
        if self.phase != Phase::Accumulating {
            return Err(StorageErr::OutOfOrder {
                op: "apply",
                phase: self.phase,
            });
        }

        let mut grads = self.gradients();
        let grad_norm = global_norm(&grads);

        if self.clip_norm > 0. && grad_norm > self.clip_norm {
            grads.scale(self.clip_norm / grad_norm);
            debug!(grad_norm = grad_norm, clip_norm = self.clip_norm; "clipped gradient");
        }

        let global_step = store.apply_gradients(&grads, self.loss, global_step)?;
        self.phase = Phase::Applied;

        Ok(Applied {
            global_step,
            loss: self.loss,
            grad_norm,
        })
    }

    /// Zeroes the accumulated loss and gradients, starting a new cycle.
    pub fn reset(&mut self) {
        self.loss = 0.;
        self.rounds = 0;
        self.grads.par_iter_mut().for_each(|grad| grad.fill(0.));
        self.contributed.fill(false);
        self.phase = Phase::Clean;
    }

    fn check_round(&self, evaluations: &[Evaluation], weights: &[f32]) -> Result<()> {
        if evaluations.len() != weights.len() {
            return Err(StorageErr::SizeMismatch {
                what: "round weights",
                got: weights.len(),
                expected: evaluations.len(),
            });
        }

        for eval in evaluations {
            if eval.grads.len() != self.grads.len() {
                return Err(StorageErr::SizeMismatch {
                    what: "gradient map",
                    got: eval.grads.len(),
                    expected: self.grads.len(),
                });
            }

            for (acc, grad) in self.grads.iter().zip(eval.grads.as_slice()) {
                if let ParamGrad::Contributed(grad) = grad
                    && grad.shape() != acc.shape()
                {
                    return Err(MlErr::ShapeMismatch {
                        what: "gradient",
                        got: grad.shape().to_vec(),
                        expected: acc.shape().to_vec(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// Computes the L2 norm of every contributed gradient taken as a single vector.
pub fn global_norm(grads: &GradientMap) -> f32 {
    grads
        .as_slice()
        .par_iter()
        .filter_map(ParamGrad::as_contribution)
        .map(|grad| grad.iter().map(|g| g * g).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use machine_learning::params::ParamId;
    use ndarray::{IxDyn, arr1};

    use super::*;

    #[derive(Default)]
    struct RecordingStore {
        applied: parking_lot::Mutex<Vec<(GradientMap, f32)>>,
    }

    impl Store for RecordingStore {
        fn apply_gradients(&self, grads: &GradientMap, loss: f32, global_step: u64) -> Result<u64> {
            self.applied.lock().push((grads.clone(), loss));
            Ok(global_step + 1)
        }
    }

    fn params() -> (ParamArena, ParamId, ParamId) {
        let mut params = ParamArena::new();
        let w = params.register("w", ArrayD::zeros(IxDyn(&[2])));
        let unk = params.register("unk", ArrayD::zeros(IxDyn(&[1])));
        (params, w, unk)
    }

    fn eval(loss: f32, w: Option<[f32; 2]>, unk: Option<f32>) -> Evaluation {
        let grads = vec![
            w.map_or(ParamGrad::NotApplicable, |g| {
                ParamGrad::Contributed(arr1(&g).into_dyn())
            }),
            unk.map_or(ParamGrad::NotApplicable, |g| {
                ParamGrad::Contributed(arr1(&[g]).into_dyn())
            }),
        ];

        Evaluation::new(loss, GradientMap::from_grads(grads))
    }

    fn contribution(grads: &GradientMap, id: ParamId) -> Vec<f32> {
        let grad = grads.get(id).unwrap().as_contribution().unwrap();
        grad.iter().copied().collect()
    }

    #[test]
    fn weighted_combine_is_exact() {
        let (params, w, _) = params();
        let mut acc = GradientAccumulator::new(&params, 0.);

        let round = [eval(2., Some([1., 1.]), None), eval(4., Some([3., -1.]), None)];
        acc.accumulate(&round, &[0.25, 0.75]).unwrap();

        assert!((acc.loss() - 3.5).abs() < 1e-6);
        let grad = contribution(&acc.gradients(), w);
        assert!((grad[0] - 2.5).abs() < 1e-6);
        assert!((grad[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn round_grouping_does_not_change_the_sum() {
        let (params, w, _) = params();
        let evals = [
            eval(1., Some([1., 0.]), None),
            eval(2., Some([0., 1.]), None),
            eval(3., Some([2., 2.]), None),
            eval(4., Some([-1., 3.]), None),
        ];
        let weights = [0.1, 0.2, 0.3, 0.4];

        let mut one_round = GradientAccumulator::new(&params, 0.);
        one_round.accumulate(&evals, &weights).unwrap();

        let mut two_rounds = GradientAccumulator::new(&params, 0.);
        two_rounds.accumulate(&evals[2..], &weights[2..]).unwrap();
        two_rounds.accumulate(&evals[..2], &weights[..2]).unwrap();

        assert_eq!(two_rounds.rounds(), 2);
        assert!((one_round.loss() - two_rounds.loss()).abs() < 1e-6);
        let a = contribution(&one_round.gradients(), w);
        let b = contribution(&two_rounds.gradients(), w);
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6));
    }

    #[test]
    fn not_applicable_counts_as_zero_unless_unanimous() {
        let (params, w, unk) = params();
        let mut acc = GradientAccumulator::new(&params, 0.);

        let round = [eval(1., Some([1., 1.]), Some(4.)), eval(1., Some([1., 1.]), None)];
        acc.accumulate(&round, &[0.5, 0.5]).unwrap();
        assert_eq!(contribution(&acc.gradients(), unk), [2.]);

        acc.reset();
        let round = [eval(1., Some([1., 1.]), None), eval(1., Some([1., 1.]), None)];
        acc.accumulate(&round, &[0.5, 0.5]).unwrap();

        let grads = acc.gradients();
        assert_eq!(grads.get(unk), Some(&ParamGrad::NotApplicable));
        assert_eq!(contribution(&grads, w), [1., 1.]);
    }

    #[test]
    fn apply_hands_the_update_to_the_store() {
        let (params, _, unk) = params();
        let store = RecordingStore::default();
        let mut acc = GradientAccumulator::new(&params, 0.);

        acc.accumulate(&[eval(3., Some([3., 4.]), None)], &[1.]).unwrap();
        let applied = acc.apply(&store, 41).unwrap();

        assert_eq!(applied.global_step, 42);
        assert_eq!(applied.loss, 3.);
        assert!((applied.grad_norm - 5.).abs() < 1e-6);

        let recorded = store.applied.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, 3.);
        assert_eq!(recorded[0].0.get(unk), Some(&ParamGrad::NotApplicable));
    }

    #[test]
    fn clipping_rescales_by_the_global_norm() {
        let (params, w, unk) = params();
        let store = RecordingStore::default();
        let mut acc = GradientAccumulator::new(&params, 1.);

        acc.accumulate(&[eval(0., Some([0., 3.]), Some(4.))], &[1.]).unwrap();
        let applied = acc.apply(&store, 0).unwrap();
        assert!((applied.grad_norm - 5.).abs() < 1e-6);

        let recorded = store.applied.lock();
        let clipped = &recorded[0].0;
        let w = contribution(clipped, w);
        let unk = contribution(clipped, unk);
        assert!((w[1] - 0.6).abs() < 1e-6);
        assert!((unk[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn gradients_under_the_threshold_are_not_clipped() {
        let (params, w, _) = params();
        let store = RecordingStore::default();
        let mut acc = GradientAccumulator::new(&params, 10.);

        acc.accumulate(&[eval(0., Some([3., 4.]), None)], &[1.]).unwrap();
        acc.apply(&store, 0).unwrap();

        assert_eq!(contribution(&store.applied.lock()[0].0, w), [3., 4.]);
    }

    #[test]
    fn cycle_order_is_enforced() {
        let (params, _, _) = params();
        let store = RecordingStore::default();
        let mut acc = GradientAccumulator::new(&params, 0.);

        let err = acc.apply(&store, 0).unwrap_err();
        assert_eq!(
            err,
            StorageErr::OutOfOrder {
                op: "apply",
                phase: Phase::Clean
            }
        );

        acc.accumulate(&[eval(1., None, None)], &[1.]).unwrap();
        acc.apply(&store, 0).unwrap();
        assert_eq!(acc.phase(), Phase::Applied);

        let err = acc.accumulate(&[eval(1., None, None)], &[1.]).unwrap_err();
        assert!(matches!(err, StorageErr::OutOfOrder { op: "accumulate", .. }));
        assert!(acc.apply(&store, 1).is_err());

        acc.reset();
        assert_eq!(acc.phase(), Phase::Clean);
        assert_eq!(acc.loss(), 0.);
        assert!(acc.accumulate(&[eval(1., None, None)], &[1.]).is_ok());
    }

    #[test]
    fn reset_zeroes_the_state() {
        let (params, w, _) = params();
        let mut acc = GradientAccumulator::new(&params, 0.);

        acc.accumulate(&[eval(5., Some([1., 2.]), None)], &[1.]).unwrap();
        acc.reset();
        acc.accumulate(&[eval(1., Some([1., 1.]), None)], &[1.]).unwrap();

        assert_eq!(acc.loss(), 1.);
        assert_eq!(acc.rounds(), 1);
        assert_eq!(contribution(&acc.gradients(), w), [1., 1.]);
    }

    #[test]
    fn misshaped_rounds_leave_the_state_untouched() {
        let (params, w, _) = params();
        let mut acc = GradientAccumulator::new(&params, 0.);
        acc.accumulate(&[eval(1., Some([1., 1.]), None)], &[1.]).unwrap();

        let bad = Evaluation::new(
            1.,
            GradientMap::from_grads(vec![
                ParamGrad::Contributed(arr1(&[1f32, 2., 3.]).into_dyn()),
                ParamGrad::NotApplicable,
            ]),
        );
        let round = [eval(1., Some([1., 1.]), None), bad];

        assert!(acc.accumulate(&round, &[0.5, 0.5]).is_err());
        assert!(acc.accumulate(&round[..1], &[0.5, 0.5]).is_err());
        assert_eq!(acc.loss(), 1.);
        assert_eq!(contribution(&acc.gradients(), w), [1., 1.]);
    }
}
