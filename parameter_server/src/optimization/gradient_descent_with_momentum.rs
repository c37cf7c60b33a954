use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip};

use super::{Optimizer, check_shape};
use crate::storage::Result;

#[derive(Debug, Clone)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: ArrayD<f32>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `shape` - The shape of the parameter slot this instance updates.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(shape: &[usize], learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: ArrayD::zeros(IxDyn(shape)),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: ArrayViewD<f32>, params: ArrayViewMutD<f32>) -> Result<()> {
        check_shape("gradient", grad.shape(), params.shape())?;
        check_shape("velocity", self.velocity.shape(), params.shape())?;

        let lr = self.learning_rate;
        let mu = self.momentum;

        Zip::from(params)
            .and(&grad)
            .and(&mut self.velocity)
            .for_each(|p, &g, v| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });

        Ok(())
    }
}
