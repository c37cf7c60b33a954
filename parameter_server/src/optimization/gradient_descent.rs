use ndarray::{ArrayViewD, ArrayViewMutD, Zip};

use super::{Optimizer, check_shape};
use crate::storage::Result;

/// Plain stochastic gradient descent, `p -= lr * g`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: ArrayViewD<f32>, params: ArrayViewMutD<f32>) -> Result<()> {
        check_shape("gradient", grad.shape(), params.shape())?;

        let lr = self.learning_rate;
        Zip::from(params).and(&grad).for_each(|p, &g| *p -= lr * g);

        Ok(())
    }
}
