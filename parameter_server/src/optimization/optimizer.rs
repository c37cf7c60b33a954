use ndarray::{ArrayViewD, ArrayViewMutD};

use crate::storage::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
///
/// Each parameter slot owns its own optimizer, so implementors may keep state
/// shaped like the slot.
pub trait Optimizer {
    /// Updates a parameter slot using its accumulated gradient.
    ///
    /// # Arguments
    /// * `grad` - The accumulated gradient of the slot.
    /// * `params` - The slot's parameters.
    ///
    /// # Returns
    /// An error if the shapes of `grad`, `params` and the optimizer state differ.
    fn update_params(&mut self, grad: ArrayViewD<f32>, params: ArrayViewMutD<f32>) -> Result<()>;
}
