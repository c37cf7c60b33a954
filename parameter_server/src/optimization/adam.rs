use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip};

use super::{Optimizer, check_shape};
use crate::storage::Result;

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: ArrayD<f32>,
    s: ArrayD<f32>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `shape` - The shape of the parameter slot this instance updates.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(shape: &[usize], learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: ArrayD::zeros(IxDyn(shape)),
            s: ArrayD::zeros(IxDyn(shape)),
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: ArrayViewD<f32>, params: ArrayViewMutD<f32>) -> Result<()> {
        check_shape("gradient", grad.shape(), params.shape())?;
        check_shape("moments", self.v.shape(), params.shape())?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        Zip::from(params)
            .and(&grad)
            .and(&mut self.v)
            .and(&mut self.s)
            .for_each(|p, &g, v, s| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    #[test]
    fn first_step_moves_by_the_learning_rate() {
        let mut optimizer = Adam::new(&[2], 0.01, 0.9, 0.999, 1e-8);
        let mut params = arr1(&[1f32, 1.]).into_dyn();
        let grad = arr1(&[3f32, -0.5]).into_dyn();

        optimizer.update_params(grad.view(), params.view_mut()).unwrap();

        // Bias correction makes the first step lr * sign(g).
        assert!((params[[0]] - 0.99).abs() < 1e-5);
        assert!((params[[1]] - 1.01).abs() < 1e-5);
    }

    #[test]
    fn zero_gradient_leaves_params_untouched() {
        let mut optimizer = Adam::new(&[1], 0.01, 0.9, 0.999, 1e-8);
        let mut params = arr1(&[2f32]).into_dyn();
        let grad = arr1(&[0f32]).into_dyn();

        optimizer.update_params(grad.view(), params.view_mut()).unwrap();
        assert_eq!(params, arr1(&[2f32]).into_dyn());
    }
}
