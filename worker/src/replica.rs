use machine_learning::{
    batching::SubBatch,
    params::{Evaluation, ParamArena},
};

use crate::error::Result;

/// A copy of the model living on a single device.
pub trait Replica {
    /// Runs the forward and backward passes over a sub-batch.
    ///
    /// # Arguments
    /// * `params` - The current model parameters.
    /// * `batch` - The sub-batch to evaluate.
    ///
    /// # Returns
    /// The sum of the per sentence losses and its gradient with respect to
    /// every parameter, `NotApplicable` for the parameters the sub-batch
    /// doesn't reach.
    fn forward_backward(&mut self, params: &ParamArena, batch: &SubBatch) -> Result<Evaluation>;
}
