use ndarray::{ArrayD, Zip};

use crate::{
    error::{MlErr, Result},
    params::{Evaluation, ParamArena},
};

/// Optional L2 penalties added to a replica's loss before its gradient is
/// computed.
///
/// * `decay_c * 0.5 * Σ ||p||²` pulls every parameter towards zero.
/// * `map_decay_c * 0.5 * Σ ||p - prior||²` pulls every parameter towards a
///   snapshot taken when the regularizer was built.
///
/// A term is only active when its coefficient is strictly positive.
#[derive(Debug, Clone, Default)]
pub struct Regularizer {
    decay_c: f32,
    map_decay_c: f32,
    prior: Option<Vec<ArrayD<f32>>>,
}

impl Regularizer {
    /// Creates a new `Regularizer`, snapshotting `params` as the prior when the
    /// MAP term is active. The prior is never updated afterwards.
    ///
    /// # Arguments
    /// * `decay_c` - The L2 coefficient.
    /// * `map_decay_c` - The MAP-L2 coefficient.
    /// * `params` - The freshly built model parameters.
    pub fn new(decay_c: f32, map_decay_c: f32, params: &ParamArena) -> Self {
        let prior = (map_decay_c > 0.).then(|| params.values().cloned().collect());

        Self {
            decay_c,
            map_decay_c,
            prior,
        }
    }

    /// Returns whether any of the penalties is active.
    pub fn is_active(&self) -> bool {
        self.decay_c > 0. || self.map_decay_c > 0.
    }

    /// Adds the active penalties to `eval`'s loss and their gradients to every
    /// parameter's gradient. Leaves `eval` untouched when no penalty is active.
    ///
    /// # Arguments
    /// * `params` - The parameters `eval` was computed with.
    /// * `eval` - The unregularized evaluation.
    ///
    /// # Returns
    /// An error if `params` doesn't match the gradients or the prior.
    pub fn apply(&self, params: &ParamArena, eval: &mut Evaluation) -> Result<()> {
        if self.decay_c > 0. {
            let mut l2_sum = 0.;

            for (id, value) in params.ids().zip(params.values()) {
                l2_sum += 0.5 * value.iter().map(|p| p * p).sum::<f32>();
                eval.grads.add(id, value.mapv(|p| p * self.decay_c).view())?;
            }

            eval.loss += l2_sum * self.decay_c;
        }

        if self.map_decay_c > 0. {
            let prior = self.prior.as_deref().unwrap_or_default();

            if prior.len() != params.len() {
                return Err(MlErr::SizeMismatch {
                    a: "prior",
                    b: "parameters",
                    got: prior.len(),
                    expected: params.len(),
                });
            }

            let mut map_l2_sum = 0.;

            for ((id, value), prior) in params.ids().zip(params.values()).zip(prior) {
                if value.shape() != prior.shape() {
                    return Err(MlErr::ShapeMismatch {
                        what: "prior",
                        got: prior.shape().to_vec(),
                        expected: value.shape().to_vec(),
                    });
                }

                let diff = Zip::from(value).and(prior).map_collect(|&p, &q| p - q);
                map_l2_sum += 0.5 * diff.iter().map(|d| d * d).sum::<f32>();
                eval.grads.add(id, diff.mapv(|d| d * self.map_decay_c).view())?;
            }

            eval.loss += map_l2_sum * self.map_decay_c;
        }

        Ok(())
    }
}
